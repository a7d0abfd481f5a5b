//! Multi-user identity demultiplexing: the encrypted identity header (EIH)
//! that lets one listener serve many users without revealing any user
//! identifier in cleartext.

use std::hash::Hash;

use dashmap::DashMap;

use ss2022_crypto::block;

use crate::errors::{Error, Result};

const EIH_LEN: usize = 16;

/// `user -> uPSK` plus the derived reverse `BLAKE3-512(uPSK)[0..16] -> user`
/// lookup used to resolve an incoming EIH. Insertion and removal keep both
/// maps in lockstep; `U` is the generic, hashable user identifier type.
pub struct UserTable<U> {
    forward: DashMap<U, Vec<u8>>,
    reverse: DashMap<[u8; EIH_LEN], U>,
}

impl<U: Clone + Eq + Hash> UserTable<U> {
    pub fn new() -> Self {
        Self {
            forward: DashMap::new(),
            reverse: DashMap::new(),
        }
    }

    /// Registers `user` with `upsk`, overwriting any prior PSK for that
    /// user (and its stale reverse entry).
    pub fn insert(&self, user: U, upsk: Vec<u8>) {
        if let Some(old) = self.forward.get(&user) {
            self.reverse.remove(&reverse_key(&old));
        }
        let key = reverse_key(&upsk);
        self.forward.insert(user.clone(), upsk);
        self.reverse.insert(key, user);
    }

    /// Removes `user`, dropping both the forward and reverse entries.
    pub fn remove(&self, user: &U) {
        if let Some((_, upsk)) = self.forward.remove(user) {
            self.reverse.remove(&reverse_key(&upsk));
        }
    }

    pub fn upsk(&self, user: &U) -> Option<Vec<u8>> {
        self.forward.get(user).map(|v| v.clone())
    }

    /// Resolves a decrypted 16-byte EIH to the user it was built for.
    pub fn lookup_eih(&self, eih: &[u8; EIH_LEN]) -> Option<(U, Vec<u8>)> {
        let user = self.reverse.get(eih)?.clone();
        let upsk = self.forward.get(&user)?.clone();
        Some((user, upsk))
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }
}

impl<U: Clone + Eq + Hash> Default for UserTable<U> {
    fn default() -> Self {
        Self::new()
    }
}

fn reverse_key(upsk: &[u8]) -> [u8; EIH_LEN] {
    let hash = blake3::hash(upsk);
    let mut out = [0u8; EIH_LEN];
    out.copy_from_slice(&hash.as_bytes()[..EIH_LEN]);
    out
}

/// Encrypts `BLAKE3-512(uPSK)[0..16]` under the identity subkey, single
/// block AES-ECB (the reverse of [`decrypt_eih`]). Used by a client-side
/// sender or a test harness building a request; the server path only ever
/// calls [`decrypt_eih`].
pub fn encrypt_eih(identity_subkey: &[u8], upsk: &[u8]) -> Result<[u8; EIH_LEN]> {
    let mut block = reverse_key(upsk);
    block::encrypt_block(identity_subkey, &mut block)?;
    Ok(block)
}

/// Decrypts a 16-byte EIH in place under the identity subkey derived from
/// the request salt.
pub fn decrypt_eih(identity_subkey: &[u8], eih: &[u8; EIH_LEN]) -> Result<[u8; EIH_LEN]> {
    let mut block = *eih;
    block::decrypt_block(identity_subkey, &mut block)?;
    Ok(block)
}

/// Resolves a decrypted EIH against `table`, returning `InvalidRequest` on
/// miss.
pub fn resolve_user<U: Clone + Eq + Hash>(
    table: &UserTable<U>,
    decrypted_eih: &[u8; EIH_LEN],
) -> Result<(U, Vec<u8>)> {
    table.lookup_eih(decrypted_eih).ok_or(Error::InvalidRequest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_resolves_user() {
        let table: UserTable<String> = UserTable::new();
        table.insert("alice".to_string(), vec![0x11u8; 16]);
        table.insert("bob".to_string(), vec![0x22u8; 16]);

        let isk = [0x33u8; 16];
        let eih = encrypt_eih(&isk, &[0x11u8; 16]).unwrap();
        let decrypted = decrypt_eih(&isk, &eih).unwrap();
        let (user, upsk) = resolve_user(&table, &decrypted).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(upsk, vec![0x11u8; 16]);
    }

    #[test]
    fn unknown_psk_fails_with_invalid_request() {
        let table: UserTable<String> = UserTable::new();
        table.insert("alice".to_string(), vec![0x11u8; 16]);

        let isk = [0x33u8; 16];
        let eih = encrypt_eih(&isk, &[0xffu8; 16]).unwrap();
        let decrypted = decrypt_eih(&isk, &eih).unwrap();
        assert!(matches!(
            resolve_user(&table, &decrypted),
            Err(Error::InvalidRequest)
        ));
    }

    #[test]
    fn flipping_eih_bit_breaks_resolution() {
        let table: UserTable<String> = UserTable::new();
        table.insert("alice".to_string(), vec![0xAAu8; 16]);

        let isk = [0x44u8; 16];
        let mut eih = encrypt_eih(&isk, &[0xAAu8; 16]).unwrap();
        eih[15] ^= 0x01;
        let decrypted = decrypt_eih(&isk, &eih).unwrap();
        assert!(resolve_user(&table, &decrypted).is_err());
    }

    #[test]
    fn remove_drops_both_directions() {
        let table: UserTable<String> = UserTable::new();
        table.insert("alice".to_string(), vec![0x55u8; 16]);
        let key = reverse_key(&[0x55u8; 16]);
        assert!(table.reverse.contains_key(&key));
        table.remove(&"alice".to_string());
        assert!(!table.reverse.contains_key(&key));
        assert!(table.is_empty());
    }
}
