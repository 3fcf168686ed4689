//! # Seen-ID Cache
//!
//! Bounded set of message ids this node has already handled. Membership is
//! the first thing checked for every inbound message, so a message loops
//! through a dense mesh at most once per node.
//!
//! Past capacity the oldest entries go, down to 75% so eviction runs
//! rarely. An evicted id that comes round again is stopped by the expiry
//! window instead.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::storage::{self, KeyValueStore, StoreResult};

/// Storage key for the persisted cache.
pub const SEEN_CACHE_KEY: &str = "mesh/seen";

/// Result of [`SeenCache::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Already seen.
    Duplicate,
    /// New, but turned away by the caller's check. Not recorded.
    Rejected,
    /// New and now recorded.
    Fresh,
}

/// Concurrent seen-id set with insertion timestamps.
pub struct SeenCache {
    capacity: usize,
    seen: DashMap<Uuid, u64>,
}

#[derive(Serialize, Deserialize)]
struct SeenSnapshot {
    entries: Vec<(Uuid, u64)>,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: DashMap::new(),
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains_key(id)
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&self, id: Uuid, now: u64) -> bool {
        let fresh = self.seen.insert(id, now).is_none();
        if fresh {
            self.maybe_evict();
        }
        fresh
    }

    /// Check-and-record in one step. `accept` runs only for an unseen id,
    /// with that id's shard locked, so of any number of concurrent callers
    /// with the same id at most one gets [`Admission::Fresh`].
    pub fn admit(&self, id: Uuid, now: u64, accept: impl FnOnce() -> bool) -> Admission {
        match self.seen.entry(id) {
            Entry::Occupied(_) => return Admission::Duplicate,
            Entry::Vacant(slot) => {
                if !accept() {
                    return Admission::Rejected;
                }
                slot.insert(now);
            }
        }
        self.maybe_evict();
        Admission::Fresh
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop entries inserted before `cutoff`.
    pub fn prune_older_than(&self, cutoff: u64) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, ts| *ts >= cutoff);
        before - self.seen.len()
    }

    fn maybe_evict(&self) {
        if self.seen.len() <= self.capacity {
            return;
        }

        let target = self.capacity * 3 / 4;
        let mut entries: Vec<(Uuid, u64)> = self
            .seen
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        entries.sort_by_key(|(_, ts)| *ts);

        let to_remove = entries.len().saturating_sub(target);
        for (id, _) in entries.iter().take(to_remove) {
            self.seen.remove(id);
        }
        debug!(evicted = to_remove, remaining = self.seen.len(), "seen cache evicted");
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> StoreResult<()> {
        let snapshot = SeenSnapshot {
            entries: self
                .seen
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        };
        storage::save(store, SEEN_CACHE_KEY, &snapshot)
    }

    /// Load a saved cache. A missing key yields an empty cache.
    pub fn load(store: &dyn KeyValueStore, capacity: usize) -> StoreResult<Self> {
        let cache = Self::new(capacity);
        if let Some(snapshot) = storage::load::<SeenSnapshot>(store, SEEN_CACHE_KEY)? {
            for (id, ts) in snapshot.entries {
                cache.seen.insert(id, ts);
            }
            cache.maybe_evict();
        }
        Ok(cache)
    }
}
