//! In-memory peer directory keyed by node-id.
//!
//! Readers are concurrent, writers serialized; `list` hands out value
//! copies so callers can never mutate the live map.

use std::collections::HashMap;
use std::sync::RwLock;

use lw_core::types::PeerRecord;

#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<String, PeerRecord>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a peer. `last_seen` never moves backwards, and a
    /// record without a pubkey does not erase a previously learned one.
    pub fn upsert(&self, mut record: PeerRecord) {
        let mut peers = self.peers.write().expect("peer directory poisoned");
        if let Some(existing) = peers.get(&record.node_id) {
            record.last_seen = record.last_seen.max(existing.last_seen);
            if record.pubkey_b64.is_empty() {
                record.pubkey_b64 = existing.pubkey_b64.clone();
            }
        }
        peers.insert(record.node_id.clone(), record);
    }

    /// Snapshot copy of every record.
    pub fn list(&self) -> Vec<PeerRecord> {
        let peers = self.peers.read().expect("peer directory poisoned");
        peers.values().cloned().collect()
    }

    pub fn get(&self, node_id: &str) -> Option<PeerRecord> {
        let peers = self.peers.read().expect("peer directory poisoned");
        peers.get(node_id).cloned()
    }

    /// Merge a snapshot; returns how many records were applied.
    pub fn merge(&self, records: Vec<PeerRecord>) -> usize {
        let count = records.len();
        for record in records {
            self.upsert(record);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.peers.read().expect("peer directory poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(node_id: &str, last_seen: i64) -> PeerRecord {
        PeerRecord {
            node_id: node_id.into(),
            addr: "10.0.0.2:8080".into(),
            api_port: 8080,
            hostname: "peer".into(),
            last_seen,
            pubkey_b64: String::new(),
        }
    }

    #[test]
    fn upsert_and_list() {
        let dir = PeerDirectory::new();
        dir.upsert(record("a", 1));
        dir.upsert(record("b", 2));
        assert_eq!(dir.len(), 2);
        assert!(dir.get("a").is_some());
        assert!(dir.get("c").is_none());
    }

    #[test]
    fn upsert_same_id_replaces() {
        let dir = PeerDirectory::new();
        dir.upsert(record("a", 1));
        let mut updated = record("a", 5);
        updated.hostname = "renamed".into();
        dir.upsert(updated);

        assert_eq!(dir.len(), 1);
        let got = dir.get("a").unwrap();
        assert_eq!(got.hostname, "renamed");
        assert_eq!(got.last_seen, 5);
    }

    #[test]
    fn last_seen_is_monotone() {
        let dir = PeerDirectory::new();
        dir.upsert(record("a", 10));
        dir.upsert(record("a", 3)); // stale beacon replayed out of order
        assert_eq!(dir.get("a").unwrap().last_seen, 10);
    }

    #[test]
    fn upsert_keeps_known_pubkey() {
        let dir = PeerDirectory::new();
        let mut with_key = record("a", 1);
        with_key.pubkey_b64 = "a2V5".into();
        dir.upsert(with_key);
        dir.upsert(record("a", 2));
        assert_eq!(dir.get("a").unwrap().pubkey_b64, "a2V5");
    }

    #[test]
    fn list_returns_copies() {
        let dir = PeerDirectory::new();
        dir.upsert(record("a", 1));
        let mut listed = dir.list();
        listed[0].hostname = "mutated".into();
        assert_eq!(dir.get("a").unwrap().hostname, "peer");
    }

    #[test]
    fn merge_counts_applied_records() {
        let dir = PeerDirectory::new();
        dir.upsert(record("a", 1));
        let n = dir.merge(vec![record("a", 2), record("b", 1), record("c", 1)]);
        assert_eq!(n, 3);
        assert_eq!(dir.len(), 3);
    }
}
