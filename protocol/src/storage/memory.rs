//! In-memory [`KeyValueStore`]. Nothing survives a drop.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{KeyValueStore, StoreResult};

/// A `BTreeMap` behind a lock. Ordered so prefix listings match sled's.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.put("a", b"1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        // Deleting twice is fine.
        store.delete("a").unwrap();
    }

    #[test]
    fn prefix_listing_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.put("pending/b", b"").unwrap();
        store.put("pending/a", b"").unwrap();
        store.put("pendinh", b"").unwrap();
        store.put("nonce_pool", b"").unwrap();
        let keys = store.keys_with_prefix("pending/").unwrap();
        assert_eq!(keys, vec!["pending/a".to_string(), "pending/b".to_string()]);
        assert_eq!(store.len(), 4);
    }
}
