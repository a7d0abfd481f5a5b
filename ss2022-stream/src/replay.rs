//! Replay defense: a salt-set filter with timed expiry for the stream
//! handshake, and a WireGuard-style sliding-window counter filter for
//! datagram packet ids.
//!
//! Both types are internally synchronized so `check`/`validate` is a
//! linearizable test-and-set, since multiple connections or packets can
//! race to claim the same salt or counter concurrently.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Request-salt replay filter. Entries expire 60s after insertion.
pub struct SaltFilter {
    seen: DashMap<Vec<u8>, Instant>,
    ttl: Duration,
}

impl SaltFilter {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Inserts `salt` if absent (or if a prior entry has already expired)
    /// and returns whether it was admitted. A duplicate within the TTL
    /// window returns `false`, which the caller turns into
    /// `Error::SaltNotUnique`.
    pub fn check(&self, salt: &[u8]) -> bool {
        let now = Instant::now();
        match self.seen.entry(salt.to_vec()) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                if now.duration_since(*e.get()) >= self.ttl {
                    e.insert(now);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(now);
                true
            }
        }
    }

    /// Drops every entry older than the TTL. Meant to be driven by a
    /// periodic task owned by the listener; `check` never depends on this
    /// having run, since it lazily evicts the probed key itself.
    pub fn sweep(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.seen.retain(|_, inserted_at| now.duration_since(*inserted_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for SaltFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Width of the sliding bitmap window, in bits. Matches the common
/// WireGuard-style replay window size; wide enough to absorb realistic UDP
/// reordering without rejecting legitimate late packets.
const WINDOW_BITS: u64 = 2048;
const BLOCK_BITS: u64 = 64;
const NUM_BLOCKS: usize = (WINDOW_BITS / BLOCK_BITS) as usize;

/// Per-session sliding-window anti-replay filter over `u64` packet
/// counters.
#[derive(Debug)]
pub struct ReplayWindow {
    bitmap: [u64; NUM_BLOCKS],
    top: u64,
    initialized: bool,
    accepted: u64,
    rejected_replay: u64,
    rejected_old: u64,
    rejected_bound: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self {
            bitmap: [0u64; NUM_BLOCKS],
            top: 0,
            initialized: false,
            accepted: 0,
            rejected_replay: 0,
            rejected_old: 0,
            rejected_bound: 0,
        }
    }

    /// Admits `counter` iff it has not been seen, is not older than the
    /// window, and does not exceed `max_counter` (a caller-supplied upper
    /// bound; always `u64::MAX` in this protocol, kept as an explicit
    /// parameter so the bound is never implicit).
    pub fn validate(&mut self, counter: u64, max_counter: u64) -> bool {
        if counter > max_counter {
            self.rejected_bound += 1;
            return false;
        }

        if !self.initialized {
            self.initialized = true;
            self.top = counter;
            self.mark(0);
            self.accepted += 1;
            return true;
        }

        if counter > self.top {
            let shift = counter - self.top;
            self.advance(shift);
            self.top = counter;
            self.mark(0);
            self.accepted += 1;
            return true;
        }

        let offset = self.top - counter;
        if offset >= WINDOW_BITS {
            self.rejected_old += 1;
            return false;
        }
        if self.is_marked(offset) {
            self.rejected_replay += 1;
            return false;
        }
        self.mark(offset);
        self.accepted += 1;
        true
    }

    fn advance(&mut self, shift: u64) {
        if shift >= WINDOW_BITS {
            self.bitmap = [0u64; NUM_BLOCKS];
            return;
        }
        let block_shift = (shift / BLOCK_BITS) as usize;
        let bit_shift = (shift % BLOCK_BITS) as u32;

        if block_shift > 0 {
            self.bitmap.rotate_right(block_shift);
            for b in self.bitmap.iter_mut().take(block_shift) {
                *b = 0;
            }
        }
        if bit_shift > 0 {
            let mut carry = 0u64;
            for b in self.bitmap.iter_mut() {
                let new_carry = *b >> (BLOCK_BITS - bit_shift as u64);
                *b = (*b << bit_shift) | carry;
                carry = new_carry;
            }
        }
    }

    fn mark(&mut self, offset: u64) {
        let block = (offset / BLOCK_BITS) as usize;
        let bit = (offset % BLOCK_BITS) as u32;
        self.bitmap[block] |= 1u64 << bit;
    }

    fn is_marked(&self, offset: u64) -> bool {
        let block = (offset / BLOCK_BITS) as usize;
        let bit = (offset % BLOCK_BITS) as u32;
        self.bitmap[block] & (1u64 << bit) != 0
    }

    pub fn stats(&self) -> ReplayWindowStats {
        ReplayWindowStats {
            accepted: self.accepted,
            rejected_replay: self.rejected_replay,
            rejected_old: self.rejected_old,
            rejected_bound: self.rejected_bound,
        }
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayWindowStats {
    pub accepted: u64,
    pub rejected_replay: u64,
    pub rejected_old: u64,
    pub rejected_bound: u64,
}
