//! # Store-and-Forward
//!
//! Messages this node originated or relayed wait here until an ack comes
//! back or they age out. When a new peer connects it gets up to
//! `per_cycle_cap` of them, oldest first, each at most once per peer.
//!
//! Three retention profiles trade storage for reach:
//!
//! | profile        | max stored | retention | per cycle |
//! |----------------|-----------:|----------:|----------:|
//! | `conservative` |         50 |       6 h |         5 |
//! | `default`      |        200 |      24 h |        10 |
//! | `aggressive`   |       1000 |      72 h |        25 |

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::message::MeshMessage;

const HOUR_MS: u64 = 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Named retention presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayProfile {
    Conservative,
    #[default]
    Default,
    Aggressive,
}

/// Relay store limits.
///
/// In JSON, `profile` picks the base values and any explicit field
/// overrides it: `{"profile": "aggressive", "per_cycle_cap": 5}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RelayConfigFile", into = "RelayConfigFile")]
pub struct RelayConfig {
    pub profile: RelayProfile,
    pub max_stored: usize,
    /// How long a stored message is kept, in milliseconds.
    pub retention_ms: u64,
    /// Stored messages offered to a newly connected peer.
    pub per_cycle_cap: usize,
}

impl RelayConfig {
    pub fn conservative() -> Self {
        Self {
            profile: RelayProfile::Conservative,
            max_stored: 50,
            retention_ms: 6 * HOUR_MS,
            per_cycle_cap: 5,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            profile: RelayProfile::Aggressive,
            max_stored: 1000,
            retention_ms: 72 * HOUR_MS,
            per_cycle_cap: 25,
        }
    }

    pub fn for_profile(profile: RelayProfile) -> Self {
        match profile {
            RelayProfile::Conservative => Self::conservative(),
            RelayProfile::Default => Self::default(),
            RelayProfile::Aggressive => Self::aggressive(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            profile: RelayProfile::Default,
            max_stored: 200,
            retention_ms: 24 * HOUR_MS,
            per_cycle_cap: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    profile: RelayProfile,
    max_stored: Option<usize>,
    retention_ms: Option<u64>,
    per_cycle_cap: Option<usize>,
}

impl From<RelayConfigFile> for RelayConfig {
    fn from(file: RelayConfigFile) -> Self {
        let base = RelayConfig::for_profile(file.profile);
        Self {
            profile: file.profile,
            max_stored: file.max_stored.unwrap_or(base.max_stored),
            retention_ms: file.retention_ms.unwrap_or(base.retention_ms),
            per_cycle_cap: file.per_cycle_cap.unwrap_or(base.per_cycle_cap),
        }
    }
}

impl From<RelayConfig> for RelayConfigFile {
    fn from(config: RelayConfig) -> Self {
        Self {
            profile: config.profile,
            max_stored: Some(config.max_stored),
            retention_ms: Some(config.retention_ms),
            per_cycle_cap: Some(config.per_cycle_cap),
        }
    }
}

// ---------------------------------------------------------------------------
// Relay Store
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredMessage {
    message: MeshMessage,
    stored_at: u64,
    offered_to: HashSet<String>,
}

/// Bounded FIFO of messages awaiting delivery.
pub struct RelayStore {
    config: RelayConfig,
    /// Message expiry window, on top of the retention limit.
    expiry_ms: u64,
    entries: Mutex<VecDeque<StoredMessage>>,
}

impl RelayStore {
    pub fn new(config: RelayConfig, expiry_ms: u64) -> Self {
        Self {
            config,
            expiry_ms,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Park a message. Returns `false` if it is already stored or already
    /// too old to keep. At capacity the oldest entry makes room.
    pub fn store(&self, message: MeshMessage, now: u64) -> bool {
        if self.is_dead(&message, now, now) {
            return false;
        }
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.message.id == message.id) {
            return false;
        }
        while entries.len() >= self.config.max_stored {
            match entries.pop_front() {
                Some(dropped) => {
                    debug!(id = %dropped.message.id, "relay store full, dropping oldest")
                }
                None => break,
            }
        }
        entries.push_back(StoredMessage {
            message,
            stored_at: now,
            offered_to: HashSet::new(),
        });
        true
    }

    /// Remove an acknowledged message.
    pub fn acknowledge(&self, id: &Uuid) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.message.id != *id);
        before != entries.len()
    }

    /// Drop everything past retention or past the expiry window.
    pub fn purge_expired(&self, now: u64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| !self.is_dead(&e.message, e.stored_at, now));
        before - entries.len()
    }

    /// The next batch for a newly connected peer: oldest first, at most
    /// `per_cycle_cap`, skipping messages already offered to it or that
    /// came from it. Offered messages are remembered.
    pub fn take_for_peer(&self, peer_id: &str, now: u64) -> Vec<MeshMessage> {
        let mut entries = self.entries.lock();
        entries.retain(|e| !self.is_dead(&e.message, e.stored_at, now));

        let mut batch = Vec::new();
        for entry in entries.iter_mut() {
            if batch.len() >= self.config.per_cycle_cap {
                break;
            }
            if entry.message.origin_peer_id == peer_id || entry.offered_to.contains(peer_id) {
                continue;
            }
            entry.offered_to.insert(peer_id.to_string());
            batch.push(entry.message.clone());
        }
        batch
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.lock().iter().any(|e| e.message.id == *id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn is_dead(&self, message: &MeshMessage, stored_at: u64, now: u64) -> bool {
        now.saturating_sub(stored_at) > self.config.retention_ms
            || message.is_expired(now, self.expiry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::message::MessageType;

    const EXPIRY: u64 = 72 * HOUR_MS;

    fn msg_at(origin: &str, created_at: u64) -> MeshMessage {
        let mut m = MeshMessage::new(MessageType::Payment, origin, vec![1], 5);
        m.created_at = created_at;
        m
    }

    #[test]
    fn profiles_scale_up() {
        let c = RelayConfig::conservative();
        let d = RelayConfig::default();
        let a = RelayConfig::aggressive();
        assert!(c.max_stored < d.max_stored && d.max_stored < a.max_stored);
        assert!(c.retention_ms < d.retention_ms && d.retention_ms < a.retention_ms);
        assert!(c.per_cycle_cap < d.per_cycle_cap && d.per_cycle_cap < a.per_cycle_cap);
    }

    #[test]
    fn json_profile_with_override() {
        let config: RelayConfig =
            serde_json::from_str(r#"{"profile": "conservative", "per_cycle_cap": 2}"#).unwrap();
        assert_eq!(config.max_stored, 50);
        assert_eq!(config.per_cycle_cap, 2);

        let back: RelayConfig =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(back, config);

        let empty: RelayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, RelayConfig::default());
    }

    #[test]
    fn capacity_drops_oldest() {
        let config = RelayConfig {
            max_stored: 2,
            ..RelayConfig::default()
        };
        let store = RelayStore::new(config, EXPIRY);
        let (a, b, c) = (msg_at("x", 0), msg_at("x", 0), msg_at("x", 0));
        assert!(store.store(a.clone(), 0));
        assert!(store.store(b.clone(), 0));
        assert!(!store.store(b.clone(), 0));
        assert!(store.store(c.clone(), 0));
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&a.id));
        assert!(store.contains(&c.id));
    }

    #[test]
    fn ack_removes() {
        let store = RelayStore::new(RelayConfig::default(), EXPIRY);
        let m = msg_at("x", 0);
        store.store(m.clone(), 0);
        assert!(store.acknowledge(&m.id));
        assert!(!store.acknowledge(&m.id));
        assert!(store.is_empty());
    }

    #[test]
    fn expired_messages_are_never_redelivered() {
        let config = RelayConfig::conservative();
        let retention = config.retention_ms;
        let store = RelayStore::new(config, EXPIRY);
        store.store(msg_at("x", 0), 0);
        assert!(store.take_for_peer("p", retention + 1).is_empty());
        assert!(store.is_empty());

        // Past the message expiry window even if freshly stored.
        let old = msg_at("x", 0);
        assert!(!store.store(old, EXPIRY + 1));
    }

    #[test]
    fn purge_counts_removed() {
        let store = RelayStore::new(RelayConfig::conservative(), EXPIRY);
        store.store(msg_at("x", 0), 0);
        store.store(msg_at("x", HOUR_MS), HOUR_MS);
        assert_eq!(store.purge_expired(6 * HOUR_MS + 1), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn per_cycle_cap_and_offer_once() {
        let config = RelayConfig {
            per_cycle_cap: 2,
            ..RelayConfig::default()
        };
        let store = RelayStore::new(config, EXPIRY);
        let msgs: Vec<MeshMessage> = (0..3).map(|_| msg_at("origin", 0)).collect();
        for m in &msgs {
            store.store(m.clone(), 0);
        }
        store.store(msg_at("peer-1", 0), 0);

        let first = store.take_for_peer("peer-1", 1);
        assert_eq!(first.iter().map(|m| m.id).collect::<Vec<_>>(), vec![msgs[0].id, msgs[1].id]);
        let second = store.take_for_peer("peer-1", 2);
        assert_eq!(second.iter().map(|m| m.id).collect::<Vec<_>>(), vec![msgs[2].id]);
        // The peer's own message is never offered back to it.
        assert!(store.take_for_peer("peer-1", 3).is_empty());
        // Another peer starts fresh.
        assert_eq!(store.take_for_peer("peer-2", 4).len(), 2);
    }
}
