//! In-memory blob cache backing `/fetch` and `/backup/get`.
//!
//! Stores replication envelopes under their deterministic
//! `blob-<hash>-<name>` keys plus ancillary byte blobs: delivered mix
//! payloads and published peer snapshots.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct BlobCache {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl BlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, value: Vec<u8>) {
        self.map.write().expect("blob cache poisoned").insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.map.read().expect("blob cache poisoned").get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.read().expect("blob cache poisoned").contains_key(key)
    }

    /// Deterministic cache key for a replicated blob.
    pub fn blob_key(hash_hex: &str, name: &str) -> String {
        format!("blob-{hash_hex}-{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let cache = BlobCache::new();
        cache.put("k", b"v".to_vec());
        assert_eq!(cache.get("k").unwrap(), b"v");
        assert!(cache.get("absent").is_none());
    }

    #[test]
    fn blob_key_is_deterministic() {
        assert_eq!(BlobCache::blob_key("abcd", "a.txt"), "blob-abcd-a.txt");
    }
}
