//! Minimal provider table backing `/dht/put` and `/dht/get`.
//!
//! Maps a string key to the set of node-ids claiming to provide it. The
//! XOR metric lives in lw-mix; this table stays flat because bucketed
//! routing is not a concern on a single subnet.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct ProviderTable {
    table: RwLock<HashMap<String, HashSet<String>>>,
}

impl ProviderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, providers: &[String]) {
        let mut table = self.table.write().expect("dht poisoned");
        let set = table.entry(key.to_string()).or_default();
        for p in providers {
            set.insert(p.clone());
        }
    }

    pub fn get(&self, key: &str) -> Vec<String> {
        let table = self.table.read().expect("dht poisoned");
        table
            .get(key)
            .map(|set| {
                let mut out: Vec<String> = set.iter().cloned().collect();
                out.sort();
                out
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_accumulates_providers() {
        let dht = ProviderTable::new();
        dht.put("k", &["n1".into()]);
        dht.put("k", &["n2".into(), "n1".into()]);
        assert_eq!(dht.get("k"), vec!["n1".to_string(), "n2".to_string()]);
        assert!(dht.get("absent").is_empty());
    }
}
