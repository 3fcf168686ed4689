//! # Payment Flow
//!
//! The glue between the three engines, one side each:
//!
//! ```text
//! sender.rs    OfflinePaymentBuilder: meta-address -> signed payload -> mesh message
//! receiver.rs  PaymentInbox: mesh message -> scan -> pending payment + ack
//! ```
//!
//! Neither side needs connectivity. The sender only needs an available
//! nonce in its pool; the receiver only needs its stealth keys.

pub mod receiver;
pub mod sender;

pub use receiver::{PaymentInbox, ReceivedPayment};
pub use sender::{OfflinePaymentBuilder, OutgoingPayment};

use thiserror::Error;

use crate::ledger::CodecError;
use crate::settlement::{NonceError, PayloadError, SettlementError};
use crate::stealth::StealthError;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment amount must be greater than zero")]
    ZeroAmount,

    #[error("stealth error: {0}")]
    Stealth(#[from] StealthError),

    #[error("nonce pool error: {0}")]
    Nonce(#[from] NonceError),

    #[error("transaction encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),
}

impl PaymentError {
    /// An empty nonce pool clears up after the next replenish.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Nonce(e) => e.is_retryable(),
            _ => false,
        }
    }
}
