//! # Mesh Relay Protocol
//!
//! Store-and-forward flooding over short-range links. There is no broker
//! and no routing table: every node dedups, checks age and hop budget, and
//! passes the message on to whoever is in range.
//!
//! Payloads are opaque here. A stealth payment looks the same as any other
//! blob until a recipient's scanner claims it.

pub mod dedup;
pub mod message;
pub mod metrics;
pub mod node;
pub mod peers;
pub mod relay;

use thiserror::Error;

pub use dedup::{Admission, SeenCache};
pub use message::{MeshMessage, MessageType, PeerAnnouncement};
pub use metrics::MeshMetrics;
pub use node::{MaintenanceReport, MeshConfig, MeshNode, MeshTransport, ProcessOutcome};
pub use peers::{ConnectionState, MeshPeer, PeerTable};
pub use relay::{RelayConfig, RelayProfile, RelayStore};

/// Mesh layer failures.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("frame of {0} bytes exceeds the 16384-byte limit")]
    FrameTooLarge(usize),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
