#![forbid(unsafe_code)]

//! AEAD suites recognized by shadowsocks-2022: AES-128-GCM, AES-256-GCM,
//! ChaCha20-Poly1305, and XChaCha20-Poly1305. All four are exposed behind a
//! single [`Aead`] enum with one `seal`/`open` API, keyed by a 96-bit nonce
//! for the first three suites and a 192-bit nonce for XChaCha20-Poly1305.

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead as _, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};

use crate::{Error, Result};

/// Which AEAD suite a session key was derived for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suite {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
    XChaCha20Poly1305,
}

impl Suite {
    /// Key length in bytes, which is also the salt length for every
    /// shadowsocks-2022 method.
    pub fn key_len(self) -> usize {
        match self {
            Suite::Aes128Gcm => 16,
            Suite::Aes256Gcm | Suite::ChaCha20Poly1305 | Suite::XChaCha20Poly1305 => 32,
        }
    }

    /// Nonce length in bytes: 96 bits for every suite except
    /// XChaCha20-Poly1305, which takes a 192-bit extended nonce.
    pub fn nonce_len(self) -> usize {
        match self {
            Suite::XChaCha20Poly1305 => 24,
            _ => 12,
        }
    }

    /// AEAD authentication tag length in bytes. Fixed at 16 for every
    /// recognized suite.
    pub fn tag_len(self) -> usize {
        16
    }
}

/// A constructed AEAD cipher instance, keyed and ready to seal or open.
pub enum Aead {
    Aes128Gcm(Box<Aes128Gcm>),
    Aes256Gcm(Box<Aes256Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
    XChaCha20Poly1305(Box<XChaCha20Poly1305>),
}

impl Aead {
    /// Builds a cipher for `suite` from `key`. `key.len()` must equal
    /// `suite.key_len()`.
    pub fn new(suite: Suite, key: &[u8]) -> Result<Self> {
        if key.len() != suite.key_len() {
            return Err(Error::InvalidKeyLen {
                expected: suite.key_len(),
                actual: key.len(),
            });
        }
        Ok(match suite {
            Suite::Aes128Gcm => {
                Aead::Aes128Gcm(Box::new(Aes128Gcm::new_from_slice(key).map_err(|_| {
                    Error::InvalidKeyLen {
                        expected: suite.key_len(),
                        actual: key.len(),
                    }
                })?))
            }
            Suite::Aes256Gcm => {
                Aead::Aes256Gcm(Box::new(Aes256Gcm::new_from_slice(key).map_err(|_| {
                    Error::InvalidKeyLen {
                        expected: suite.key_len(),
                        actual: key.len(),
                    }
                })?))
            }
            Suite::ChaCha20Poly1305 => Aead::ChaCha20Poly1305(Box::new(
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::InvalidKeyLen {
                    expected: suite.key_len(),
                    actual: key.len(),
                })?,
            )),
            Suite::XChaCha20Poly1305 => Aead::XChaCha20Poly1305(Box::new(
                XChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::InvalidKeyLen {
                    expected: suite.key_len(),
                    actual: key.len(),
                })?,
            )),
        })
    }

    /// The suite this instance was constructed for.
    pub fn suite(&self) -> Suite {
        match self {
            Aead::Aes128Gcm(_) => Suite::Aes128Gcm,
            Aead::Aes256Gcm(_) => Suite::Aes256Gcm,
            Aead::ChaCha20Poly1305(_) => Suite::ChaCha20Poly1305,
            Aead::XChaCha20Poly1305(_) => Suite::XChaCha20Poly1305,
        }
    }

    /// Seals `plaintext` under `nonce` with associated data `aad`, returning
    /// ciphertext with the 16-byte tag appended.
    pub fn seal(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_nonce_len(nonce)?;
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        match self {
            Aead::Aes128Gcm(c) => c.encrypt(GenericArray::from_slice(nonce), payload),
            Aead::Aes256Gcm(c) => c.encrypt(GenericArray::from_slice(nonce), payload),
            Aead::ChaCha20Poly1305(c) => c.encrypt(GenericArray::from_slice(nonce), payload),
            Aead::XChaCha20Poly1305(c) => c.encrypt(GenericArray::from_slice(nonce), payload),
        }
        .map_err(|e| Error::Seal(e.to_string()))
    }

    /// Opens `ciphertext` (payload + tag) under `nonce` with associated data
    /// `aad`, returning the decrypted plaintext.
    pub fn open(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_nonce_len(nonce)?;
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match self {
            Aead::Aes128Gcm(c) => c.decrypt(GenericArray::from_slice(nonce), payload),
            Aead::Aes256Gcm(c) => c.decrypt(GenericArray::from_slice(nonce), payload),
            Aead::ChaCha20Poly1305(c) => c.decrypt(GenericArray::from_slice(nonce), payload),
            Aead::XChaCha20Poly1305(c) => c.decrypt(GenericArray::from_slice(nonce), payload),
        }
        .map_err(|e| Error::Open(e.to_string()))
    }

    fn check_nonce_len(&self, nonce: &[u8]) -> Result<()> {
        let expected = self.suite().nonce_len();
        if nonce.len() != expected {
            return Err(Error::InvalidNonceLen {
                expected,
                actual: nonce.len(),
            });
        }
        Ok(())
    }
}
