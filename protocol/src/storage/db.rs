//! # SledStore
//!
//! sled-backed [`KeyValueStore`]. Everything lives in a single tree,
//! `meshstealth`, with namespaced string keys:
//!
//! | Key               | Value                          |
//! |-------------------|--------------------------------|
//! | `nonce_pool`      | `bincode(Vec<NonceEntry>)`     |
//! | `pending/<id>`    | `bincode(PendingPayment)`      |
//! | `mesh/seen`       | `bincode(Vec<(Uuid, u64)>)`    |
//!
//! sled orders keys lexicographically, so prefix scans are cheap.

use std::path::Path;

use sled::{Db, Tree};

use super::{KeyValueStore, StoreError, StoreResult};

const TREE_NAME: &str = "meshstealth";

/// Persistent store on top of sled.
///
/// sled handles its own locking, so a `SledStore` can be shared across
/// threads via `Arc` without extra synchronization.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
}

impl SledStore {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that is cleaned up when dropped. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { db, tree })
    }

    /// Force everything written so far onto disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.tree.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.tree
            .scan_prefix(prefix.as_bytes())
            .keys()
            .map(|key| {
                let key = key?;
                String::from_utf8(key.to_vec())
                    .map_err(|e| StoreError::Backend(format!("non-utf8 key: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_store_roundtrip() {
        let store = SledStore::open_temporary().unwrap();
        store.put("nonce_pool", b"blob").unwrap();
        assert_eq!(store.get("nonce_pool").unwrap(), Some(b"blob".to_vec()));
        store.delete("nonce_pool").unwrap();
        assert!(store.get("nonce_pool").unwrap().is_none());
    }

    #[test]
    fn prefix_scan() {
        let store = SledStore::open_temporary().unwrap();
        store.put("pending/2", b"").unwrap();
        store.put("pending/1", b"").unwrap();
        store.put("mesh/seen", b"").unwrap();
        let keys = store.keys_with_prefix("pending/").unwrap();
        assert_eq!(keys, vec!["pending/1".to_string(), "pending/2".to_string()]);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.put("k", b"v").unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
