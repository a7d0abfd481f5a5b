//! AES single-block cipher, used standalone (outside of any AEAD mode) by the
//! encrypted identity header (EIH) and by the UDP AES-header-block wire
//! layout. Both call sites encrypt or decrypt exactly one 16-byte block under
//! a subkey derived for that purpose; neither needs a mode of operation.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use aes::{Aes128, Aes256};

use crate::{Error, Result};

const BLOCK_LEN: usize = 16;

/// Encrypts a single 16-byte block in place under a 128- or 256-bit key.
///
/// `key` must be 16 bytes (AES-128) or 32 bytes (AES-256); any other length
/// is rejected rather than silently truncated or padded.
pub fn encrypt_block(key: &[u8], block: &mut [u8; BLOCK_LEN]) -> Result<()> {
    let ga = GenericArray::from_mut_slice(block);
    match key.len() {
        16 => {
            let cipher = Aes128::new(GenericArray::from_slice(key));
            cipher.encrypt_block(ga);
            Ok(())
        }
        32 => {
            let cipher = Aes256::new(GenericArray::from_slice(key));
            cipher.encrypt_block(ga);
            Ok(())
        }
        other => Err(Error::InvalidKeyLen {
            expected: 16,
            actual: other,
        }),
    }
}

/// Decrypts a single 16-byte block in place under a 128- or 256-bit key.
pub fn decrypt_block(key: &[u8], block: &mut [u8; BLOCK_LEN]) -> Result<()> {
    let ga = GenericArray::from_mut_slice(block);
    match key.len() {
        16 => {
            let cipher = Aes128::new(GenericArray::from_slice(key));
            cipher.decrypt_block(ga);
            Ok(())
        }
        32 => {
            let cipher = Aes256::new(GenericArray::from_slice(key));
            cipher.decrypt_block(ga);
            Ok(())
        }
        other => Err(Error::InvalidKeyLen {
            expected: 16,
            actual: other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes128_round_trips() {
        let key = [0x42u8; 16];
        let mut block = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let original = block;
        encrypt_block(&key, &mut block).unwrap();
        assert_ne!(block, original);
        decrypt_block(&key, &mut block).unwrap();
        assert_eq!(block, original);
    }

    #[test]
    fn aes256_round_trips() {
        let key = [0x7fu8; 32];
        let mut block = [0u8; 16];
        let original = block;
        encrypt_block(&key, &mut block).unwrap();
        assert_ne!(block, original);
        decrypt_block(&key, &mut block).unwrap();
        assert_eq!(block, original);
    }

    #[test]
    fn rejects_bad_key_length() {
        let key = [0u8; 20];
        let mut block = [0u8; 16];
        assert!(encrypt_block(&key, &mut block).is_err());
    }
}
