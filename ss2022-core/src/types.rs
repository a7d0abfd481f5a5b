#![cfg_attr(test, allow(clippy::unwrap_used))]

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Second-precision timestamp, used for the handshake and UDP packet
/// timestamp-window checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampSecs(pub u64);

impl TimestampSecs {
    /// Current wall-clock time, seconds since the Unix epoch.
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(now.as_secs())
    }

    /// Absolute distance to another timestamp.
    pub fn abs_diff(self, other: TimestampSecs) -> u64 {
        self.0.abs_diff(other.0)
    }

    /// Whether `self` is within `window` of `other`.
    pub fn within(self, other: TimestampSecs, window: Duration) -> bool {
        self.abs_diff(other) <= window.as_secs()
    }
}

impl fmt::Display for TimestampSecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TimestampSecs {
    fn from(v: u64) -> Self {
        Self(v)
    }
}
impl From<TimestampSecs> for u64 {
    fn from(v: TimestampSecs) -> Self {
        v.0
    }
}

impl FromStr for TimestampSecs {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_window() {
        let now = TimestampSecs(1_000);
        assert!(TimestampSecs(1_030).within(now, Duration::from_secs(30)));
        assert!(!TimestampSecs(1_031).within(now, Duration::from_secs(30)));
        assert!(TimestampSecs(970).within(now, Duration::from_secs(30)));
        assert!(!TimestampSecs(969).within(now, Duration::from_secs(30)));
    }

    #[test]
    fn parses_from_str() {
        let ts: TimestampSecs = "1234567890".parse().unwrap();
        assert_eq!(ts.0, 1_234_567_890);
    }
}
