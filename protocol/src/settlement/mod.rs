//! # Settlement Module
//!
//! Durable-nonce settlement: how a payment made with no connectivity ends
//! up on the ledger days later, broadcast by whichever party gets online
//! first.
//!
//! ```text
//! nonce_pool.rs  NoncePool, the sender's stock of durable nonce accounts
//! payload.rs     StealthPaymentPayload, what travels over the mesh
//! pending.rs     PendingPayment and its persisted status machine
//! engine.rs      SettlementEngine, broadcast with retry and expiry
//! ```

pub mod engine;
pub mod nonce_pool;
pub mod payload;
pub mod pending;

pub use engine::{SettlementConfig, SettlementEngine};
pub use nonce_pool::{NonceEntry, NonceError, NoncePool, NoncePoolConfig, NonceState, NONCE_POOL_KEY};
pub use payload::{PayloadError, StealthPaymentPayload};
pub use pending::{PaymentStatus, PendingPayment, PendingPaymentStore, SettledBy};

use crate::ledger::{CodecError, LedgerError};
use crate::storage::StoreError;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("pending payment {0} not found")]
    NotFound(String),

    #[error("pending payment {0} already exists")]
    AlreadyExists(String),

    #[error("invalid payment transition from {from:?} to {to:?}")]
    InvalidTransition { from: PaymentStatus, to: PaymentStatus },

    #[error("receiver cannot settle a protocol v{0} payment")]
    ReceiverSettlementUnsupported(u8),

    #[error("payment {0} has no pre-signed transaction")]
    NoPresignedTransaction(String),

    #[error("gave up after {0} settlement attempts")]
    AttemptsExhausted(u32),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("transaction encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("nonce pool error: {0}")]
    Nonce(#[from] NonceError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),
}

impl SettlementError {
    /// Whether calling `settle` again later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_retryable(),
            Self::Nonce(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_cause() {
        assert!(SettlementError::Ledger(LedgerError::RateLimited).is_retryable());
        assert!(SettlementError::Nonce(NonceError::PoolEmpty).is_retryable());
        assert!(!SettlementError::Ledger(LedgerError::ExecutionFailed("x".into())).is_retryable());
        assert!(!SettlementError::AttemptsExhausted(5).is_retryable());
    }
}
