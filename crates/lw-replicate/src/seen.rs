//! Bounded seen-set for loop suppression.
//!
//! Capacity 4096 msg-ids under LRU eviction: far beyond what a realistic
//! fanout window holds in flight, so a once-seen id stays effective for the
//! whole propagation of its envelope while memory stays bounded in
//! long-lived nodes.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

const CAPACITY: usize = 4096;

#[derive(Debug)]
pub struct SeenSet {
    inner: Mutex<LruCache<String, ()>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(CAPACITY).expect("nonzero capacity"),
            )),
        }
    }

    /// Record `msgid`; returns true when it was not already present.
    pub fn insert(&self, msgid: &str) -> bool {
        let mut cache = self.inner.lock().expect("seen set poisoned");
        cache.put(msgid.to_string(), ()).is_none()
    }

    pub fn contains(&self, msgid: &str) -> bool {
        let mut cache = self.inner.lock().expect("seen set poisoned");
        cache.get(msgid).is_some()
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_is_new() {
        let seen = SeenSet::new();
        assert!(seen.insert("m-1"));
        assert!(!seen.insert("m-1"));
        assert!(seen.contains("m-1"));
        assert!(!seen.contains("m-2"));
    }

    #[test]
    fn capacity_is_bounded() {
        let seen = SeenSet::new();
        for i in 0..(CAPACITY + 10) {
            seen.insert(&format!("m-{i}"));
        }
        // the oldest entries were evicted, the newest survive
        assert!(!seen.contains("m-0"));
        assert!(seen.contains(&format!("m-{}", CAPACITY + 9)));
    }
}
