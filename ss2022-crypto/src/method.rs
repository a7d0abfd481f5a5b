//! Recognized shadowsocks-2022 method names, and the AEAD suite each one
//! selects. The datagram service additionally prefers an XChaCha20-Poly1305
//! variant of the ChaCha20 method for its whole-packet layout, which this
//! module exposes as [`Method::udp_whole_packet_suite`].

use std::fmt;
use std::str::FromStr;

use crate::aead::Suite;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Blake3Aes128Gcm,
    Blake3Aes256Gcm,
    Blake3ChaCha20Poly1305,
}

impl Method {
    /// The AEAD suite used for stream record framing and the
    /// AES-header-block UDP layout.
    pub fn suite(self) -> Suite {
        match self {
            Method::Blake3Aes128Gcm => Suite::Aes128Gcm,
            Method::Blake3Aes256Gcm => Suite::Aes256Gcm,
            Method::Blake3ChaCha20Poly1305 => Suite::ChaCha20Poly1305,
        }
    }

    /// The AEAD suite used for the XChaCha20-whole-packet UDP layout. AES
    /// methods keep their own suite for both UDP layouts; only the ChaCha20
    /// method swaps in its extended-nonce sibling.
    pub fn udp_whole_packet_suite(self) -> Suite {
        match self {
            Method::Blake3ChaCha20Poly1305 => Suite::XChaCha20Poly1305,
            other => other.suite(),
        }
    }

    /// Salt length in bytes, equal to the session key length for every
    /// method.
    pub fn salt_len(self) -> usize {
        self.suite().key_len()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Blake3Aes128Gcm => "2022-blake3-aes-128-gcm",
            Method::Blake3Aes256Gcm => "2022-blake3-aes-256-gcm",
            Method::Blake3ChaCha20Poly1305 => "2022-blake3-chacha20-poly1305",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = crate::Error;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s {
            "2022-blake3-aes-128-gcm" => Ok(Method::Blake3Aes128Gcm),
            "2022-blake3-aes-256-gcm" => Ok(Method::Blake3Aes256Gcm),
            "2022-blake3-chacha20-poly1305" => Ok(Method::Blake3ChaCha20Poly1305),
            other => Err(crate::Error::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_recognized_methods() {
        for m in [
            Method::Blake3Aes128Gcm,
            Method::Blake3Aes256Gcm,
            Method::Blake3ChaCha20Poly1305,
        ] {
            assert_eq!(m.as_str().parse::<Method>().unwrap(), m);
        }
    }

    #[test]
    fn rejects_unknown_method() {
        assert!("2022-blake3-aes-512-gcm".parse::<Method>().is_err());
    }

    #[test]
    fn chacha_method_swaps_suite_for_udp_whole_packet() {
        let m = Method::Blake3ChaCha20Poly1305;
        assert_eq!(m.suite(), Suite::ChaCha20Poly1305);
        assert_eq!(m.udp_whole_packet_suite(), Suite::XChaCha20Poly1305);
    }

    #[test]
    fn aes_methods_keep_same_suite_for_both_udp_layouts() {
        let m = Method::Blake3Aes256Gcm;
        assert_eq!(m.suite(), m.udp_whole_packet_suite());
    }

    #[test]
    fn salt_len_matches_key_len() {
        assert_eq!(Method::Blake3Aes128Gcm.salt_len(), 16);
        assert_eq!(Method::Blake3Aes256Gcm.salt_len(), 32);
        assert_eq!(Method::Blake3ChaCha20Poly1305.salt_len(), 32);
    }
}
