//! Peer bookkeeping. The transport reports connects, disconnects and
//! signal readings; the table is only ever mutated through those events.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Link state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

/// A nearby device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshPeer {
    pub id: String,
    pub name: Option<String>,
    /// Last signal strength reading, in dBm.
    pub rssi: Option<i16>,
    pub state: ConnectionState,
    /// Unix milliseconds.
    pub last_seen: u64,
}

impl MeshPeer {
    pub fn new(id: impl Into<String>, state: ConnectionState, now: u64) -> Self {
        Self {
            id: id.into(),
            name: None,
            rssi: None,
            state,
            last_seen: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_stale(&self, now: u64, timeout: Duration) -> bool {
        now.saturating_sub(self.last_seen) > timeout.as_millis() as u64
    }
}

/// All peers the node currently knows about.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<String, MeshPeer>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<MeshPeer> {
        self.peers.read().get(id).cloned()
    }

    /// Insert or replace a whole record.
    pub fn upsert(&self, peer: MeshPeer) {
        self.peers.write().insert(peer.id.clone(), peer);
    }

    /// Set the connection state, creating the peer if unknown.
    pub fn set_state(&self, id: &str, state: ConnectionState, now: u64) {
        let mut peers = self.peers.write();
        let peer = peers
            .entry(id.to_string())
            .or_insert_with(|| MeshPeer::new(id, state, now));
        peer.state = state;
        peer.last_seen = now;
    }

    /// Refresh last-seen, and the name or signal reading when given.
    /// Unknown peers are ignored.
    pub fn touch(&self, id: &str, now: u64, name: Option<String>, rssi: Option<i16>) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(id) {
            Some(peer) => {
                peer.last_seen = peer.last_seen.max(now);
                if name.is_some() {
                    peer.name = name;
                }
                if rssi.is_some() {
                    peer.rssi = rssi;
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<MeshPeer> {
        self.peers.write().remove(id)
    }

    /// Ids of peers in the `Connected` state.
    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .peers
            .read()
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn all(&self) -> Vec<MeshPeer> {
        self.peers.read().values().cloned().collect()
    }

    /// Drop every peer silent for longer than `timeout`. Returns their ids.
    pub fn evict_stale(&self, now: u64, timeout: Duration) -> Vec<String> {
        let mut peers = self.peers.write();
        let stale: Vec<String> = peers
            .values()
            .filter(|p| p.is_stale(now, timeout))
            .map(|p| p.id.clone())
            .collect();
        for id in &stale {
            peers.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_changes_create_and_update() {
        let table = PeerTable::new();
        table.set_state("p1", ConnectionState::Discovered, 10);
        assert_eq!(table.get("p1").unwrap().state, ConnectionState::Discovered);
        table.set_state("p1", ConnectionState::Connected, 20);
        let peer = table.get("p1").unwrap();
        assert!(peer.is_connected());
        assert_eq!(peer.last_seen, 20);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn touch_updates_only_known_peers() {
        let table = PeerTable::new();
        assert!(!table.touch("ghost", 5, None, None));
        table.set_state("p1", ConnectionState::Connected, 10);
        assert!(table.touch("p1", 30, Some("Dana".into()), Some(-60)));
        let peer = table.get("p1").unwrap();
        assert_eq!(peer.name.as_deref(), Some("Dana"));
        assert_eq!(peer.rssi, Some(-60));
        assert_eq!(peer.last_seen, 30);
        // Name survives a touch without one.
        table.touch("p1", 40, None, None);
        assert_eq!(table.get("p1").unwrap().name.as_deref(), Some("Dana"));
    }

    #[test]
    fn staleness() {
        let peer = MeshPeer::new("p", ConnectionState::Connected, 1_000);
        assert!(!peer.is_stale(1_500, Duration::from_secs(1)));
        assert!(peer.is_stale(2_001, Duration::from_secs(1)));
    }

    #[test]
    fn evict_stale_removes_only_silent_peers() {
        let table = PeerTable::new();
        table.set_state("old", ConnectionState::Connected, 0);
        table.set_state("new", ConnectionState::Connected, 50_000);
        let evicted = table.evict_stale(70_000, Duration::from_secs(60));
        assert_eq!(evicted, vec!["old".to_string()]);
        assert_eq!(table.connected_ids(), vec!["new".to_string()]);
    }

    #[test]
    fn connected_ids_skip_other_states() {
        let table = PeerTable::new();
        table.set_state("a", ConnectionState::Connected, 0);
        table.set_state("b", ConnectionState::Disconnected, 0);
        table.set_state("c", ConnectionState::Connecting, 0);
        assert_eq!(table.connected_ids(), vec!["a".to_string()]);
        assert!(table.remove("b").is_some());
        assert_eq!(table.len(), 2);
    }
}
