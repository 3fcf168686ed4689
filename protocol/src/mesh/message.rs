//! # Mesh Messages
//!
//! The unit of flooding. A message keeps its id, origin and creation time
//! for its whole life; only the TTL changes, one step per hop.
//!
//! Frames on the wire are bincode. Anything over [`MAX_FRAME_SIZE`] is
//! rejected before decoding.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MeshError;
use crate::config::{
    clamp_ttl, now_millis, ACK_TTL, DISCOVERY_TTL, MAX_FRAME_SIZE, PAYMENT_TTL,
};

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// A bincode `StealthPaymentPayload`.
    Payment,
    /// Payload is the 16-byte id of the acknowledged message.
    Ack,
    /// Payload is a bincode [`PeerAnnouncement`].
    Discovery,
}

/// A flooded mesh message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshMessage {
    pub id: Uuid,
    pub message_type: MessageType,
    /// Remaining hops, including the one about to be taken.
    pub ttl: u8,
    pub origin_peer_id: String,
    /// Unix milliseconds at the origin.
    pub created_at: u64,
    pub payload: Vec<u8>,
    /// Set for messages meant for one peer, such as acks.
    pub target_peer_id: Option<String>,
}

impl MeshMessage {
    /// A new message with a fresh id. `ttl` is clamped to `[1, MAX_MESSAGE_TTL]`.
    pub fn new(
        message_type: MessageType,
        origin_peer_id: impl Into<String>,
        payload: Vec<u8>,
        ttl: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            ttl: clamp_ttl(ttl),
            origin_peer_id: origin_peer_id.into(),
            created_at: now_millis(),
            payload,
            target_peer_id: None,
        }
    }

    pub fn payment(origin_peer_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(MessageType::Payment, origin_peer_id, payload, PAYMENT_TTL)
    }

    /// Acknowledge `acked` back to its origin.
    pub fn ack(origin_peer_id: impl Into<String>, acked: &MeshMessage) -> Self {
        let mut msg = Self::new(
            MessageType::Ack,
            origin_peer_id,
            acked.id.as_bytes().to_vec(),
            ACK_TTL,
        );
        msg.target_peer_id = Some(acked.origin_peer_id.clone());
        msg
    }

    pub fn discovery(announcement: &PeerAnnouncement) -> Result<Self, MeshError> {
        let payload = bincode::serialize(announcement)
            .map_err(|e| MeshError::Serialization(e.to_string()))?;
        Ok(Self::new(
            MessageType::Discovery,
            announcement.peer_id.clone(),
            payload,
            DISCOVERY_TTL,
        ))
    }

    /// Address the message to a single peer.
    pub fn with_target(mut self, peer_id: impl Into<String>) -> Self {
        self.target_peer_id = Some(peer_id.into());
        self
    }

    /// The copy to pass on: same id, origin and timestamp, one hop fewer.
    /// `None` once the hop budget is spent.
    pub fn forwarded(&self) -> Option<Self> {
        if self.ttl <= 1 {
            return None;
        }
        Some(Self {
            ttl: self.ttl - 1,
            ..self.clone()
        })
    }

    /// Age in milliseconds. Clock skew into the future counts as zero.
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    pub fn is_expired(&self, now: u64, window_millis: u64) -> bool {
        self.age_millis(now) > window_millis
    }

    pub fn is_addressed_to(&self, peer_id: &str) -> bool {
        self.target_peer_id.as_deref() == Some(peer_id)
    }

    /// The id an ack refers to.
    pub fn acked_id(&self) -> Option<Uuid> {
        if self.message_type != MessageType::Ack {
            return None;
        }
        Uuid::from_slice(&self.payload).ok()
    }

    pub fn announcement(&self) -> Option<PeerAnnouncement> {
        if self.message_type != MessageType::Discovery {
            return None;
        }
        bincode::deserialize(&self.payload).ok()
    }

    pub fn encode(&self) -> Result<Vec<u8>, MeshError> {
        let bytes =
            bincode::serialize(self).map_err(|e| MeshError::Serialization(e.to_string()))?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(MeshError::FrameTooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MeshError> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(MeshError::FrameTooLarge(bytes.len()));
        }
        bincode::deserialize(bytes).map_err(|e| MeshError::Serialization(e.to_string()))
    }
}

/// Broadcast by a device when it comes into range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAnnouncement {
    pub peer_id: String,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_MESSAGE_TTL;

    #[test]
    fn ttl_is_clamped_at_creation() {
        let high = MeshMessage::new(MessageType::Payment, "a", vec![], 200);
        assert_eq!(high.ttl, MAX_MESSAGE_TTL);
        let zero = MeshMessage::new(MessageType::Payment, "a", vec![], 0);
        assert_eq!(zero.ttl, 1);
    }

    #[test]
    fn forwarded_keeps_identity_and_drops_one_hop() {
        let msg = MeshMessage::payment("alice", vec![1, 2, 3]);
        let next = msg.forwarded().unwrap();
        assert_eq!(next.id, msg.id);
        assert_eq!(next.origin_peer_id, msg.origin_peer_id);
        assert_eq!(next.created_at, msg.created_at);
        assert_eq!(next.payload, msg.payload);
        assert_eq!(next.ttl, msg.ttl - 1);
    }

    #[test]
    fn last_hop_does_not_forward() {
        let msg = MeshMessage::new(MessageType::Payment, "a", vec![], 1);
        assert!(msg.forwarded().is_none());
    }

    #[test]
    fn ack_points_back_at_origin() {
        let payment = MeshMessage::payment("alice", vec![9]);
        let ack = MeshMessage::ack("bob", &payment);
        assert_eq!(ack.ttl, ACK_TTL);
        assert!(ack.ttl < payment.ttl);
        assert!(ack.is_addressed_to("alice"));
        assert_eq!(ack.acked_id(), Some(payment.id));
        assert_eq!(payment.acked_id(), None);
    }

    #[test]
    fn discovery_carries_announcement() {
        let ann = PeerAnnouncement {
            peer_id: "carol".into(),
            name: Some("Carol's phone".into()),
        };
        let msg = MeshMessage::discovery(&ann).unwrap();
        assert_eq!(msg.origin_peer_id, "carol");
        assert_eq!(msg.announcement(), Some(ann));
    }

    #[test]
    fn expiry_uses_creation_time() {
        let mut msg = MeshMessage::payment("a", vec![]);
        msg.created_at = 1_000;
        assert!(!msg.is_expired(1_500, 1_000));
        assert!(msg.is_expired(2_001, 1_000));
        // A timestamp from the future is not expired.
        assert!(!msg.is_expired(0, 1_000));
    }

    #[test]
    fn frame_roundtrip_and_limits() {
        let msg = MeshMessage::payment("a", vec![7u8; 100]).with_target("b");
        let bytes = msg.encode().unwrap();
        assert_eq!(MeshMessage::decode(&bytes).unwrap(), msg);

        assert!(matches!(
            MeshMessage::decode(&vec![0u8; MAX_FRAME_SIZE + 1]),
            Err(MeshError::FrameTooLarge(_))
        ));
        assert!(matches!(
            MeshMessage::payment("a", vec![0u8; MAX_FRAME_SIZE]).encode(),
            Err(MeshError::FrameTooLarge(_))
        ));
        assert!(MeshMessage::decode(&[1, 2, 3]).is_err());
    }
}
