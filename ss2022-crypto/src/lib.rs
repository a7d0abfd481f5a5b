#![forbid(unsafe_code)]

//! Shadowsocks-2022 cryptographic primitives.
//!
//! - `aead`: AES-128-GCM, AES-256-GCM, ChaCha20-Poly1305, XChaCha20-Poly1305
//!   behind one `Aead` enum.
//! - `block`: AES single-block cipher, used by the encrypted identity header
//!   and the UDP header block.
//! - `kdf`: BLAKE3 `Key`/`SessionKey`/`IdentitySubkey` (plus zeroize-on-drop
//!   allocating variants) and the deterministic PRF used to draw XChaCha
//!   nonces for a UDP session.
//! - `method`: the recognized method name strings and the AEAD suite each
//!   one selects.

pub mod aead;
pub mod block;
pub mod kdf;
pub mod method;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("AEAD seal failed: {0}")]
    Seal(String),
    #[error("AEAD open failed: {0}")]
    Open(String),
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLen { expected: usize, actual: usize },
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLen { expected: usize, actual: usize },
    #[error("unrecognized method: {0}")]
    UnknownMethod(String),
}

pub type Result<T> = core::result::Result<T, Error>;
