#![forbid(unsafe_code)]

//! BLAKE3-based key derivation.
//!
//! Three derivations are used by the protocol, all built on
//! [`blake3::Hasher`] rather than a fixed-size digest so the output length
//! generalizes past 32 bytes if a future method ever needs it:
//!
//! - [`key`] — default-mode hash, used to derive the identity/session master
//!   key from a base64-decoded PSK.
//! - [`session_key`] — keyed `derive_key` mode, used to derive the per-salt
//!   read/write subkeys for a stream or datagram session.
//! - [`identity_subkey`] — keyed `derive_key` mode with a distinct context,
//!   used to derive the EIH block-cipher key.

use rand::RngCore;
use zeroize::Zeroizing;

const SESSION_CONTEXT: &str = "shadowsocks 2022 session subkey";
const IDENTITY_CONTEXT: &str = "shadowsocks 2022 identity subkey";

/// `Key(material, L)`: default-mode BLAKE3 hash of `material`, truncated (or
/// extended, via the XOF) to `out.len()` bytes.
pub fn key(material: &[u8], out: &mut [u8]) {
    let mut hasher = blake3::Hasher::new();
    hasher.update(material);
    hasher.finalize_xof().fill(out);
}

/// `SessionKey(psk, salt_or_session_id, L)`: BLAKE3 `derive_key` keyed by
/// `psk`, fed `salt`, output truncated to `out.len()` bytes.
pub fn session_key(psk: &[u8], salt: &[u8], out: &mut [u8]) {
    let mut hasher = blake3::Hasher::new_derive_key(SESSION_CONTEXT);
    hasher.update(psk);
    hasher.update(salt);
    hasher.finalize_xof().fill(out);
}

/// `IdentitySubkey(psk, salt, L)`: BLAKE3 `derive_key` keyed by `psk`, fed
/// `salt`, output truncated to `out.len()` bytes. Used for the EIH block
/// cipher key, distinct from [`session_key`] by context string alone.
pub fn identity_subkey(psk: &[u8], salt: &[u8], out: &mut [u8]) {
    let mut hasher = blake3::Hasher::new_derive_key(IDENTITY_CONTEXT);
    hasher.update(psk);
    hasher.update(salt);
    hasher.finalize_xof().fill(out);
}

/// Allocating form of [`session_key`]: derived subkeys are scratch material
/// that should outlive only the cipher initialization they feed, then be
/// wiped. Returns a freshly allocated buffer that zeroizes itself on drop
/// instead of requiring the caller to supply one.
pub fn session_key_alloc(psk: &[u8], salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    session_key(psk, salt, &mut out);
    out
}

/// Allocating, zeroize-on-drop form of [`identity_subkey`]; see
/// [`session_key_alloc`].
pub fn identity_subkey_alloc(psk: &[u8], salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    identity_subkey(psk, salt, &mut out);
    out
}

/// A deterministic pseudo-random byte stream, seeded once from the OS CSPRNG,
/// used to draw XChaCha20 nonces for a UDP session without a per-packet
/// syscall. Each session owns one `Blake3Prf`; successive calls to
/// [`Blake3Prf::fill`] hand out disjoint slices of the same BLAKE3 XOF
/// stream, so no two packets in a session ever reuse a nonce.
pub struct Blake3Prf {
    reader: blake3::OutputReader,
}

impl Blake3Prf {
    /// Seeds a new PRF from 32 bytes of OS randomness.
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Seeds a new PRF from an explicit 32-byte seed. Exposed for tests; the
    /// runtime path always goes through [`Blake3Prf::new`].
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut hasher = blake3::Hasher::new_keyed(seed);
        hasher.update(b"shadowsocks 2022 udp nonce prf");
        let reader = hasher.finalize_xof();
        Self { reader }
    }

    /// Fills `out` with the next bytes of the stream.
    pub fn fill(&mut self, out: &mut [u8]) {
        self.reader.fill(out);
    }
}

impl Default for Blake3Prf {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        key(b"some psk material", &mut a);
        key(b"some psk material", &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn session_key_differs_by_salt() {
        let psk = b"0123456789abcdef";
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        session_key(psk, b"salt-one", &mut a);
        session_key(psk, b"salt-two", &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn session_and_identity_subkeys_differ() {
        let psk = b"0123456789abcdef";
        let salt = b"same-salt-00000000000000";
        let mut session = [0u8; 32];
        let mut identity = [0u8; 32];
        session_key(psk, salt, &mut session);
        identity_subkey(psk, salt, &mut identity);
        assert_ne!(session, identity);
    }

    #[test]
    fn prf_stream_never_repeats_within_session() {
        let mut prf = Blake3Prf::from_seed(&[7u8; 32]);
        let mut nonces = Vec::new();
        for _ in 0..64 {
            let mut nonce = [0u8; 24];
            prf.fill(&mut nonce);
            assert!(!nonces.contains(&nonce));
            nonces.push(nonce);
        }
    }

    #[test]
    fn alloc_variants_match_the_out_param_form() {
        let psk = b"0123456789abcdef";
        let salt = b"some-salt";
        let mut expected = [0u8; 32];
        session_key(psk, salt, &mut expected);
        assert_eq!(&*session_key_alloc(psk, salt, 32), &expected);

        let mut expected_identity = [0u8; 32];
        identity_subkey(psk, salt, &mut expected_identity);
        assert_eq!(&*identity_subkey_alloc(psk, salt, 32), &expected_identity);
    }

    #[test]
    fn prf_is_reproducible_from_same_seed() {
        let mut a = Blake3Prf::from_seed(&[9u8; 32]);
        let mut b = Blake3Prf::from_seed(&[9u8; 32]);
        let mut out_a = [0u8; 24];
        let mut out_b = [0u8; 24];
        a.fill(&mut out_a);
        b.fill(&mut out_b);
        assert_eq!(out_a, out_b);
    }
}
