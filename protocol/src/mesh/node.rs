//! # Mesh Node
//!
//! The per-device runtime. It owns the peer table, seen cache, relay store
//! and counters, and talks to the radio through [`MeshTransport`].
//!
//! Every inbound message is classified, in this order:
//!
//! ```text
//! id already seen                        -> Duplicate
//! age > expiry window                    -> Expired
//! addressed to us, or last hop (ttl = 1) -> Processed
//! otherwise                              -> Relay(copy with ttl - 1)
//! ```
//!
//! The id goes into the seen cache before anything is forwarded, so a
//! message echoing back through the mesh is always a duplicate.
//!
//! Both `Processed` and `Relay` messages are delivered to local listeners:
//! a relaying node may itself be the recipient of a stealth payment, and
//! only a scan can tell. Messages addressed to another peer are relayed
//! but not delivered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::dedup::{Admission, SeenCache};
use super::message::{MeshMessage, MessageType, PeerAnnouncement};
use super::metrics::MeshMetrics;
use super::peers::{ConnectionState, MeshPeer, PeerTable};
use super::relay::{RelayConfig, RelayStore};
use super::MeshError;
use crate::config::{
    clamp_ttl, now_millis, MAX_MESSAGE_TTL, MESSAGE_EXPIRY_WINDOW, PEER_STALE_TIMEOUT,
    SEEN_CACHE_CAPACITY,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for flooding and peer tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Hop ceiling. Inbound messages claiming more are clamped to it.
    pub max_ttl: u8,
    /// Seen-id entries kept before eviction.
    pub seen_cache_capacity: usize,
    /// Messages older than this (milliseconds) are dropped.
    pub message_expiry_ms: u64,
    /// Peers silent this long (milliseconds) are evicted.
    pub peer_stale_timeout_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_ttl: MAX_MESSAGE_TTL,
            seen_cache_capacity: SEEN_CACHE_CAPACITY,
            message_expiry_ms: MESSAGE_EXPIRY_WINDOW.as_millis() as u64,
            peer_stale_timeout_ms: PEER_STALE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl MeshConfig {
    pub fn peer_stale_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_stale_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Transport & Outcomes
// ---------------------------------------------------------------------------

/// Point-to-point byte delivery to an adjacent peer. Unordered and
/// unreliable; a failed send is logged and forgotten.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    async fn send(&self, peer_id: &str, frame: Vec<u8>) -> Result<(), MeshError>;
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Duplicate,
    Expired,
    /// Consumed here and not passed on.
    Processed,
    /// Passed on. Carries the forwarded copy.
    Relay(MeshMessage),
}

/// Summary of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub purged_messages: usize,
    pub evicted_peers: Vec<String>,
    pub pruned_seen_ids: usize,
}

type MessageCallback = Arc<dyn Fn(&MeshMessage) + Send + Sync>;

// ---------------------------------------------------------------------------
// Mesh Node
// ---------------------------------------------------------------------------

pub struct MeshNode {
    peer_id: String,
    config: MeshConfig,
    transport: Arc<dyn MeshTransport>,
    peers: PeerTable,
    seen: SeenCache,
    relay: RelayStore,
    metrics: MeshMetrics,
    listeners: RwLock<Vec<MessageCallback>>,
}

impl MeshNode {
    pub fn new(
        peer_id: impl Into<String>,
        config: MeshConfig,
        relay_config: RelayConfig,
        transport: Arc<dyn MeshTransport>,
    ) -> Result<Self, MeshError> {
        let seen = SeenCache::new(config.seen_cache_capacity);
        let relay = RelayStore::new(relay_config, config.message_expiry_ms);
        Ok(Self {
            peer_id: peer_id.into(),
            config,
            transport,
            peers: PeerTable::new(),
            seen,
            relay,
            metrics: MeshMetrics::new()?,
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Replace the seen cache, typically with one loaded from storage.
    pub fn with_seen_cache(mut self, seen: SeenCache) -> Self {
        self.seen = seen;
        self
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn seen_cache(&self) -> &SeenCache {
        &self.seen
    }

    pub fn relay_store(&self) -> &RelayStore {
        &self.relay
    }

    pub fn metrics(&self) -> &MeshMetrics {
        &self.metrics
    }

    /// Register a listener for messages delivered to this node.
    pub fn on_message_received<F>(&self, callback: F)
    where
        F: Fn(&MeshMessage) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(callback));
    }

    // -- classification ----------------------------------------------------

    /// Run the state machine for one message and record it as seen.
    /// Pure apart from the seen-cache insert.
    pub fn classify(&self, message: &MeshMessage, now: u64) -> ProcessOutcome {
        let expiry_ms = self.config.message_expiry_ms;
        match self.seen.admit(message.id, now, || !message.is_expired(now, expiry_ms)) {
            Admission::Duplicate => return ProcessOutcome::Duplicate,
            Admission::Rejected => return ProcessOutcome::Expired,
            Admission::Fresh => {}
        }

        let ttl = message.ttl.min(self.config.max_ttl);
        if message.is_addressed_to(&self.peer_id) || ttl <= 1 {
            return ProcessOutcome::Processed;
        }
        let mut forwarded = message.clone();
        forwarded.ttl = ttl - 1;
        ProcessOutcome::Relay(forwarded)
    }

    // -- outbound ----------------------------------------------------------

    /// Flood a locally originated message. Returns how many peers it went to.
    pub async fn submit(&self, mut message: MeshMessage) -> Result<usize, MeshError> {
        message.ttl = clamp_ttl(message.ttl).min(self.config.max_ttl);
        let frame = message.encode()?;
        let now = now_millis();
        self.seen.insert(message.id, now);

        if message.message_type != MessageType::Discovery && self.relay.store(message.clone(), now)
        {
            self.metrics.stored_total.inc();
        }

        let targets = self.peers.connected_ids();
        let sent = self.send_to_all(&targets, &frame).await;
        info!(
            id = %message.id,
            kind = ?message.message_type,
            ttl = message.ttl,
            peers = sent,
            "submitted mesh message"
        );
        Ok(sent)
    }

    /// Announce ourselves to the neighbourhood.
    pub async fn announce(&self, name: Option<String>) -> Result<usize, MeshError> {
        let announcement = PeerAnnouncement {
            peer_id: self.peer_id.clone(),
            name,
        };
        self.submit(MeshMessage::discovery(&announcement)?).await
    }

    async fn send_to_all(&self, targets: &[String], frame: &[u8]) -> usize {
        let mut sent = 0;
        for peer in targets {
            match self.transport.send(peer, frame.to_vec()).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(peer = %peer, error = %e, "mesh send failed"),
            }
        }
        sent
    }

    // -- inbound -----------------------------------------------------------

    /// Handle a raw frame from an adjacent peer.
    pub async fn handle_inbound(
        &self,
        from_peer: &str,
        frame: &[u8],
    ) -> Result<ProcessOutcome, MeshError> {
        let now = now_millis();
        self.peers.touch(from_peer, now, None, None);

        let message = match MeshMessage::decode(frame) {
            Ok(m) => m,
            Err(e) => {
                self.metrics.malformed_total.inc();
                debug!(peer = from_peer, error = %e, "dropping malformed frame");
                return Err(e);
            }
        };
        Ok(self.handle_message(from_peer, message, now).await)
    }

    /// Handle an already-decoded message.
    pub async fn handle_message(
        &self,
        from_peer: &str,
        message: MeshMessage,
        now: u64,
    ) -> ProcessOutcome {
        let outcome = self.classify(&message, now);
        match &outcome {
            ProcessOutcome::Duplicate => {
                self.metrics.duplicate_total.inc();
                trace!(id = %message.id, peer = from_peer, "duplicate");
            }
            ProcessOutcome::Expired => {
                self.metrics.expired_total.inc();
                debug!(id = %message.id, age_ms = message.age_millis(now), "expired");
            }
            ProcessOutcome::Processed => {
                self.metrics.processed_total.inc();
                debug!(id = %message.id, kind = ?message.message_type, "processed");
                self.deliver(&message, now);
            }
            ProcessOutcome::Relay(forwarded) => {
                self.metrics.relayed_total.inc();
                self.deliver(&message, now);
                self.relay_onward(from_peer, forwarded, now).await;
            }
        }
        outcome
    }

    async fn relay_onward(&self, from_peer: &str, forwarded: &MeshMessage, now: u64) {
        let frame = match forwarded.encode() {
            Ok(f) => f,
            Err(e) => {
                warn!(id = %forwarded.id, error = %e, "cannot re-encode for relay");
                return;
            }
        };
        if forwarded.message_type != MessageType::Discovery
            && self.relay.store(forwarded.clone(), now)
        {
            self.metrics.stored_total.inc();
        }
        let targets: Vec<String> = self
            .peers
            .connected_ids()
            .into_iter()
            .filter(|p| p != from_peer && *p != forwarded.origin_peer_id)
            .collect();
        let sent = self.send_to_all(&targets, &frame).await;
        debug!(id = %forwarded.id, ttl = forwarded.ttl, peers = sent, "relayed");
    }

    /// Apply protocol side effects, then hand the message to listeners.
    fn deliver(&self, message: &MeshMessage, now: u64) {
        match message.message_type {
            MessageType::Ack => {
                if let Some(acked) = message.acked_id() {
                    if self.relay.acknowledge(&acked) {
                        debug!(acked = %acked, "ack cleared relay entry");
                    }
                }
            }
            MessageType::Discovery => {
                if let Some(ann) = message.announcement() {
                    if !self.peers.touch(&ann.peer_id, now, ann.name.clone(), None) {
                        let mut peer = MeshPeer::new(&ann.peer_id, ConnectionState::Discovered, now);
                        peer.name = ann.name;
                        self.peers.upsert(peer);
                    }
                }
            }
            MessageType::Payment => {}
        }

        if message
            .target_peer_id
            .as_deref()
            .is_some_and(|target| target != self.peer_id)
        {
            return;
        }

        let listeners: Vec<MessageCallback> = self.listeners.read().clone();
        for listener in listeners {
            listener(message);
        }
    }

    // -- peer events -------------------------------------------------------

    /// A peer came into range but isn't connected yet.
    pub fn on_peer_discovered(&self, peer_id: &str, name: Option<String>, rssi: Option<i16>) {
        let now = now_millis();
        if !self.peers.touch(peer_id, now, name.clone(), rssi) {
            let mut peer = MeshPeer::new(peer_id, ConnectionState::Discovered, now);
            peer.name = name;
            peer.rssi = rssi;
            self.peers.upsert(peer);
        }
    }

    /// A link is up. Flush stored messages the peer hasn't been offered.
    pub async fn on_peer_connected(&self, peer_id: &str) -> usize {
        let now = now_millis();
        self.peers.set_state(peer_id, ConnectionState::Connected, now);
        self.refresh_peer_gauge();

        let batch = self.relay.take_for_peer(peer_id, now);
        let mut sent = 0;
        for message in &batch {
            let frame = match message.encode() {
                Ok(f) => f,
                Err(_) => continue,
            };
            match self.transport.send(peer_id, frame).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(peer = peer_id, error = %e, "store-and-forward send failed"),
            }
        }
        info!(peer = peer_id, offered = batch.len(), sent, "peer connected");
        sent
    }

    pub fn on_peer_disconnected(&self, peer_id: &str) {
        self.peers
            .set_state(peer_id, ConnectionState::Disconnected, now_millis());
        self.refresh_peer_gauge();
        debug!(peer = peer_id, "peer disconnected");
    }

    pub fn evict_stale_peers(&self, now: u64) -> Vec<String> {
        let evicted = self.peers.evict_stale(now, self.config.peer_stale_timeout());
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted stale peers");
            self.refresh_peer_gauge();
        }
        evicted
    }

    /// Periodic housekeeping: purge dead relay entries, stale peers and
    /// seen ids older than the expiry window.
    pub fn maintenance(&self, now: u64) -> MaintenanceReport {
        let purged_messages = self.relay.purge_expired(now);
        let evicted_peers = self.evict_stale_peers(now);
        let pruned_seen_ids = self
            .seen
            .prune_older_than(now.saturating_sub(self.config.message_expiry_ms));
        MaintenanceReport {
            purged_messages,
            evicted_peers,
            pruned_seen_ids,
        }
    }

    fn refresh_peer_gauge(&self) {
        self.metrics
            .connected_peers
            .set(self.peers.connected_ids().len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, MeshMessage)>>,
    }

    impl RecordingTransport {
        fn sent_to(&self, peer: &str) -> Vec<MeshMessage> {
            self.sent
                .lock()
                .iter()
                .filter(|(p, _)| p == peer)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MeshTransport for RecordingTransport {
        async fn send(&self, peer_id: &str, frame: Vec<u8>) -> Result<(), MeshError> {
            let msg = MeshMessage::decode(&frame)?;
            self.sent.lock().push((peer_id.to_string(), msg));
            Ok(())
        }
    }

    fn node(id: &str) -> (MeshNode, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let node = MeshNode::new(
            id,
            MeshConfig::default(),
            RelayConfig::default(),
            transport.clone(),
        )
        .unwrap();
        (node, transport)
    }

    #[test]
    fn classification_order() {
        let (node, _) = node("me");
        let now = now_millis();

        let msg = MeshMessage::payment("alice", vec![1]);
        assert!(matches!(node.classify(&msg, now), ProcessOutcome::Relay(_)));
        assert_eq!(node.classify(&msg, now), ProcessOutcome::Duplicate);

        // Expired wins over anything TTL would say.
        let mut old = MeshMessage::payment("alice", vec![]);
        old.created_at = now - node.config().message_expiry_ms - 1;
        assert_eq!(node.classify(&old, now), ProcessOutcome::Expired);

        let last_hop = MeshMessage::new(MessageType::Payment, "alice", vec![], 1);
        assert_eq!(node.classify(&last_hop, now), ProcessOutcome::Processed);

        let for_me = MeshMessage::payment("alice", vec![]).with_target("me");
        assert_eq!(node.classify(&for_me, now), ProcessOutcome::Processed);
    }

    #[test]
    fn concurrent_copies_are_handled_once() {
        let (node, _) = node("me");
        for _ in 0..50 {
            let msg = MeshMessage::payment("alice", vec![7]);
            let barrier = std::sync::Barrier::new(4);
            let fresh = AtomicUsize::new(0);
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        barrier.wait();
                        if node.classify(&msg, now_millis()) != ProcessOutcome::Duplicate {
                            fresh.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            });
            assert_eq!(fresh.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn relay_copy_keeps_identity() {
        let (node, _) = node("me");
        let msg = MeshMessage::payment("alice", vec![4, 2]);
        match node.classify(&msg, now_millis()) {
            ProcessOutcome::Relay(fwd) => {
                assert_eq!(fwd.id, msg.id);
                assert_eq!(fwd.origin_peer_id, "alice");
                assert_eq!(fwd.ttl, msg.ttl - 1);
            }
            other => panic!("expected relay, got {other:?}"),
        }
    }

    #[test]
    fn inbound_ttl_is_capped() {
        let (node, _) = node("me");
        let mut msg = MeshMessage::payment("alice", vec![]);
        msg.ttl = 200;
        match node.classify(&msg, now_millis()) {
            ProcessOutcome::Relay(fwd) => assert_eq!(fwd.ttl, MAX_MESSAGE_TTL - 1),
            other => panic!("expected relay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn relays_to_everyone_but_sender_and_origin() {
        let (node, transport) = node("me");
        node.on_peer_connected("alice").await;
        node.on_peer_connected("bob").await;
        node.on_peer_connected("carol").await;

        let msg = MeshMessage::payment("alice", vec![1]);
        let outcome = node.handle_inbound("bob", &msg.encode().unwrap()).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Relay(_)));

        assert!(transport.sent_to("alice").is_empty());
        assert!(transport.sent_to("bob").is_empty());
        let to_carol = transport.sent_to("carol");
        assert_eq!(to_carol.len(), 1);
        assert_eq!(to_carol[0].ttl, msg.ttl - 1);
        assert_eq!(node.metrics().relayed_total.get(), 1);

        // Echo from carol is a duplicate and goes nowhere.
        let echo = node
            .handle_inbound("carol", &to_carol[0].encode().unwrap())
            .await
            .unwrap();
        assert_eq!(echo, ProcessOutcome::Duplicate);
        assert_eq!(transport.sent_to("carol").len(), 1);
    }

    #[tokio::test]
    async fn malformed_frames_are_counted() {
        let (node, _) = node("me");
        assert!(node.handle_inbound("x", &[0xde, 0xad]).await.is_err());
        assert_eq!(node.metrics().malformed_total.get(), 1);
    }

    #[tokio::test]
    async fn listeners_get_processed_and_relayed_but_not_foreign_targets() {
        let (node, _) = node("me");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        node.on_message_received(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let now = now_millis();
        node.handle_message("p", MeshMessage::payment("a", vec![]), now).await;
        node.handle_message("p", MeshMessage::new(MessageType::Payment, "a", vec![], 1), now)
            .await;
        node.handle_message("p", MeshMessage::payment("a", vec![]).with_target("zed"), now)
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stored_messages_flush_on_connect_and_clear_on_ack() {
        let (node, transport) = node("me");
        let payment = MeshMessage::payment("me", vec![5]);
        assert_eq!(node.submit(payment.clone()).await.unwrap(), 0);
        assert!(node.relay_store().contains(&payment.id));

        assert_eq!(node.on_peer_connected("bob").await, 1);
        assert_eq!(transport.sent_to("bob")[0].id, payment.id);
        // Reconnecting doesn't resend.
        node.on_peer_disconnected("bob");
        assert_eq!(node.on_peer_connected("bob").await, 0);

        let ack = MeshMessage::ack("bob", &payment);
        let outcome = node.handle_inbound("bob", &ack.encode().unwrap()).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Processed);
        assert!(!node.relay_store().contains(&payment.id));
    }

    #[tokio::test]
    async fn discovery_updates_peer_table() {
        let (node, _) = node("me");
        let ann = PeerAnnouncement {
            peer_id: "erin".into(),
            name: Some("Erin".into()),
        };
        node.handle_inbound("erin", &MeshMessage::discovery(&ann).unwrap().encode().unwrap())
            .await
            .unwrap();
        assert_eq!(node.peers().get("erin").unwrap().name.as_deref(), Some("Erin"));
    }

    #[tokio::test]
    async fn maintenance_evicts_and_purges() {
        let (node, _) = node("me");
        node.on_peer_connected("old").await;
        node.submit(MeshMessage::payment("me", vec![])).await.unwrap();
        assert_eq!(node.metrics().connected_peers.get(), 1);

        let far_future = now_millis() + node.config().message_expiry_ms + 1;
        let report = node.maintenance(far_future);
        assert_eq!(report.evicted_peers, vec!["old".to_string()]);
        assert_eq!(report.purged_messages, 1);
        assert_eq!(report.pruned_seen_ids, 1);
        assert!(node.peers().is_empty());
        assert_eq!(node.metrics().connected_peers.get(), 0);
    }
}
