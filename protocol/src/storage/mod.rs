//! # Storage Module
//!
//! Persistence for the pieces of state that must survive an app restart:
//! the nonce pool, pending payments, and the mesh seen-id set.
//!
//! The host platform owns the real secure storage; from our side it is an
//! opaque blob store keyed by strings. [`KeyValueStore`] is that seam.
//!
//! ```text
//! memory.rs  MemoryStore, a BTreeMap behind a lock (tests, ephemeral nodes)
//! db.rs      SledStore, sled-backed persistence for desktop and relays
//! ```
//!
//! Values are bincode blobs. JSON is for config; bincode is for storage.

pub mod db;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use db::SledStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors from a key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// An opaque blob store.
///
/// Implementations must be safe to share across threads. Writes are
/// expected to be durable once `put` returns, to whatever degree the
/// backend can promise that.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or overwrite `key`.
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// All keys starting with `prefix`, in ascending byte order.
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Read and bincode-decode the value under `key`.
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> StoreResult<Option<T>> {
    match store.get(key)? {
        Some(bytes) => bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

/// Bincode-encode `value` and store it under `key`.
pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> StoreResult<()> {
    let bytes = bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.put(key, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn save_then_load_typed_value() {
        let store = MemoryStore::new();
        let sample = Sample {
            name: "relay".into(),
            count: 3,
        };
        save(&store, "sample", &sample).unwrap();
        let loaded: Option<Sample> = load(&store, "sample").unwrap();
        assert_eq!(loaded, Some(sample));
    }

    #[test]
    fn load_missing_key_is_none() {
        let store = MemoryStore::new();
        let loaded: Option<Sample> = load(&store, "nope").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_garbage_is_serialization_error() {
        let store = MemoryStore::new();
        store.put("bad", &[0xFF]).unwrap();
        let result: StoreResult<Option<Sample>> = load(&store, "bad");
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }
}
