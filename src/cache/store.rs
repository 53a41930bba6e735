//! Entry Store Module
//!
//! Per-namespace HashMap storage with an exact running byte-size counter.
//!
//! The store never checks expiry on `get`; readers decide whether an entry
//! is still logically present, and the sweeper reclaims expired entries.

use std::collections::HashMap;

use crate::cache::CacheEntry;

// == Entry Store ==
#[derive(Debug, Default)]
pub struct EntryStore {
    /// Key-entry storage
    entries: HashMap<String, CacheEntry>,
    /// Sum of `entry.size` over all entries
    total_size: u64,
    /// Next access sequence number
    next_seq: u64,
}

impl EntryStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Put ==
    /// Inserts an entry, replacing any entry with the same key.
    ///
    /// Returns the replaced entry.
    pub fn put(&mut self, mut entry: CacheEntry) -> Option<CacheEntry> {
        entry.size = entry.payload.len() as u64;
        entry.access_seq = self.bump_seq();

        let previous = self.remove(&entry.key);
        self.total_size += entry.size;
        self.entries.insert(entry.key.clone(), entry);
        previous
    }

    // == Get ==
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Touch ==
    /// Records a read hit on `key` and returns the updated entry.
    pub fn touch(&mut self, key: &str) -> Option<&CacheEntry> {
        let seq = self.bump_seq();
        let entry = self.entries.get_mut(key)?;
        entry.touch(seq);
        Some(entry)
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size -= entry.size;
        Some(entry)
    }

    // == Scan ==
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    // == Clear ==
    /// Removes every entry, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.total_size = 0;
        count
    }

    // == Remove Expired ==
    /// Removes entries expired at `now_ms`, returning the number removed.
    pub fn remove_expired(&mut self, now_ms: u64) -> usize {
        self.remove_where(|entry| entry.is_expired_at(now_ms))
    }

    // == Remove Tagged ==
    pub fn remove_tagged(&mut self, tag: &str) -> usize {
        self.remove_where(|entry| entry.has_tag(tag))
    }

    fn remove_where(&mut self, predicate: impl Fn(&CacheEntry) -> bool) -> usize {
        let before = self.entries.len();
        let mut freed = 0;
        self.entries.retain(|_, entry| {
            let remove = predicate(entry);
            if remove {
                freed += entry.size;
            }
            !remove
        });
        self.total_size -= freed;
        before - self.entries.len()
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{SetOptions, StoredPayload};
    use std::time::Duration;

    fn entry(key: &str, size: usize, options: SetOptions) -> CacheEntry {
        CacheEntry::new(
            key,
            StoredPayload::plain(vec![0u8; size]),
            Duration::from_secs(60),
            &options,
        )
    }

    #[test]
    fn test_store_new() {
        let store = EntryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.total_size(), 0);
    }

    #[test]
    fn test_put_and_get() {
        let mut store = EntryStore::new();
        assert!(store.put(entry("a", 10, SetOptions::new())).is_none());

        assert_eq!(store.len(), 1);
        assert_eq!(store.total_size(), 10);
        assert_eq!(store.get("a").map(|e| e.size), Some(10));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_put_replaces_and_adjusts_size() {
        let mut store = EntryStore::new();
        store.put(entry("a", 10, SetOptions::new()));
        let previous = store.put(entry("a", 4, SetOptions::new()));

        assert_eq!(previous.map(|e| e.size), Some(10));
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_size(), 4);
    }

    #[test]
    fn test_remove() {
        let mut store = EntryStore::new();
        store.put(entry("a", 10, SetOptions::new()));
        store.put(entry("b", 5, SetOptions::new()));

        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
        assert_eq!(store.total_size(), 5);
        assert!(!store.contains_key("a"));
    }

    #[test]
    fn test_touch_bumps_sequence() {
        let mut store = EntryStore::new();
        store.put(entry("a", 1, SetOptions::new()));
        store.put(entry("b", 1, SetOptions::new()));
        let seq_b = store.get("b").unwrap().access_seq;

        let touched = store.touch("a").unwrap();
        assert_eq!(touched.access_count, 1);
        assert!(touched.access_seq > seq_b);
        assert!(store.touch("missing").is_none());
    }

    #[test]
    fn test_remove_tagged() {
        let mut store = EntryStore::new();
        store.put(entry("a", 1, SetOptions::new().tag("x")));
        store.put(entry("b", 2, SetOptions::new().tags(["x", "y"])));
        store.put(entry("c", 3, SetOptions::new().tag("y")));

        assert_eq!(store.remove_tagged("x"), 2);
        assert!(store.contains_key("c"));
        assert_eq!(store.total_size(), 3);
    }

    #[test]
    fn test_remove_expired() {
        let mut store = EntryStore::new();
        store.put(entry("a", 1, SetOptions::new()));
        let expires_at = store.get("a").unwrap().expires_at;

        assert_eq!(store.remove_expired(expires_at - 1), 0);
        assert_eq!(store.remove_expired(expires_at), 1);
        assert_eq!(store.total_size(), 0);
    }

    #[test]
    fn test_clear() {
        let mut store = EntryStore::new();
        store.put(entry("a", 1, SetOptions::new()));
        store.put(entry("b", 1, SetOptions::new()));

        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert_eq!(store.total_size(), 0);
    }
}
