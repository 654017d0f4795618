//! Ed25519 public-key slots stored as base64 parameter strings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::info;

use super::{find, KvStore, ParamStore, ParamValue};

pub const MAX_PUBLIC_KEYS: usize = 5;
pub const PUBLIC_KEY_LEN: usize = 32;

/// Version prefix stored in front of the base64 key material.
pub const PUBLIC_KEY_PREFIX: &str = "PUBLIC_KEYV1:";

fn key_desc(index: usize) -> Option<&'static super::ParamDesc> {
    match index {
        0 => find("PUBLIC_KEY1"),
        1 => find("PUBLIC_KEY2"),
        2 => find("PUBLIC_KEY3"),
        3 => find("PUBLIC_KEY4"),
        4 => find("PUBLIC_KEY5"),
        _ => None,
    }
}

impl<K: KvStore> ParamStore<K> {
    /// Decode slot `index` into raw key bytes. Empty, unprefixed or
    /// undecodable slots return `None`.
    pub fn get_public_key(&self, index: usize) -> Option<[u8; PUBLIC_KEY_LEN]> {
        let desc = key_desc(index)?;
        let ParamValue::Str(stored) = self.values().get(desc.field) else {
            return None;
        };
        let b64 = stored.strip_prefix(PUBLIC_KEY_PREFIX)?;
        let decoded = BASE64.decode(b64).ok()?;
        decoded.try_into().ok()
    }

    pub fn set_public_key(
        &mut self,
        index: usize,
        key: &[u8; PUBLIC_KEY_LEN],
    ) -> bool {
        let Some(desc) = key_desc(index) else {
            return false;
        };
        let stored = format!("{PUBLIC_KEY_PREFIX}{}", BASE64.encode(key));
        self.set(desc, ParamValue::Str(stored))
    }

    pub fn remove_public_key(&mut self, index: usize) -> bool {
        let Some(desc) = key_desc(index) else {
            return false;
        };
        self.set(desc, ParamValue::Str(String::new()))
    }

    /// True when not a single slot holds a decodable key. The secure
    /// command layer treats this as development mode and accepts anything.
    pub fn no_public_keys(&self) -> bool {
        (0..MAX_PUBLIC_KEYS).all(|i| self.get_public_key(i).is_none())
    }

    /// First-boot seeding: install build-time keys into empty slots, once.
    /// `builtin` entries are base64 strings without the storage prefix.
    pub fn seed_builtin_keys(&mut self, builtin: &[&str]) {
        if self.values().done_init != 0 {
            return;
        }
        for (i, b64) in builtin.iter().take(MAX_PUBLIC_KEYS).enumerate() {
            if self.get_public_key(i).is_some() {
                continue;
            }
            let Ok(decoded) = BASE64.decode(b64) else {
                continue;
            };
            let Ok(key) = <[u8; PUBLIC_KEY_LEN]>::try_from(decoded.as_slice())
            else {
                continue;
            };
            if self.set_public_key(i, &key) {
                info!(slot = i, "seeded builtin public key");
            }
        }
        if let Some(done) = find("DONE_INIT") {
            self.set(done, ParamValue::U8(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::MemoryKv;

    #[test]
    fn set_get_roundtrip() {
        let mut store = ParamStore::load(MemoryKv::default());
        assert!(store.no_public_keys());
        let key = [0x5a; PUBLIC_KEY_LEN];
        assert!(store.set_public_key(2, &key));
        assert_eq!(store.get_public_key(2), Some(key));
        assert!(!store.no_public_keys());
        assert!(store.remove_public_key(2));
        assert!(store.no_public_keys());
    }

    #[test]
    fn undecodable_slot_is_none() {
        let mut store = ParamStore::load(MemoryKv::default());
        let desc = find("PUBLIC_KEY1").unwrap();
        store.set(desc, ParamValue::Str("not a key".to_string()));
        assert!(store.get_public_key(0).is_none());
        store.set(
            desc,
            ParamValue::Str(format!("{PUBLIC_KEY_PREFIX}%%%")),
        );
        assert!(store.get_public_key(0).is_none());
    }

    #[test]
    fn seeding_runs_once() {
        let mut store = ParamStore::load(MemoryKv::default());
        let b64 = BASE64.encode([7u8; PUBLIC_KEY_LEN]);
        store.seed_builtin_keys(&[&b64]);
        assert_eq!(store.get_public_key(0), Some([7u8; PUBLIC_KEY_LEN]));
        assert_eq!(store.values().done_init, 1);

        // a later boot with different builtins must not overwrite
        store.remove_public_key(0);
        store.seed_builtin_keys(&[&b64]);
        assert!(store.get_public_key(0).is_none());
    }
}
