//! # Ledger Client
//!
//! The settlement layer talks to the ledger through [`LedgerClient`]. The
//! host app supplies the implementation (JSON-RPC over whatever HTTP stack
//! the platform has); tests use [`SimulatedLedger`](super::SimulatedLedger).
//!
//! Errors are classified so the caller can decide between retrying the
//! same transaction, giving up, or treating the payment as already done.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::nonce_account::NonceAccountState;
use super::pubkey::{Hash, Pubkey, Signature};
use super::transaction::Transaction;

/// Failures from the ledger collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The endpoint is throttling us. Retry the same request after a pause.
    #[error("rate limited by ledger endpoint")]
    RateLimited,

    /// No answer in time. The transaction may or may not have landed.
    #[error("ledger request timed out")]
    Timeout,

    /// The ledger ran the transaction and it failed. Resending the same
    /// bytes will fail the same way.
    #[error("transaction execution failed: {0}")]
    ExecutionFailed(String),

    /// This exact transaction (or its nonce) was already used. For a
    /// durable payment this means the counterparty settled it first.
    #[error("transaction already processed")]
    AlreadyProcessed,

    #[error("transport error: {0}")]
    Transport(String),
}

impl LedgerError {
    /// Whether sending the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Transport(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Run a ledger call under a wall-clock limit. Running out of time is
/// reported as [`LedgerError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> LedgerResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout),
    }
}

/// Async access to the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch and decode a nonce account. `None` if the account does not
    /// exist or is not an initialized nonce account.
    async fn get_nonce_account(&self, address: &Pubkey) -> LedgerResult<Option<NonceAccountState>>;

    async fn get_latest_blockhash(&self) -> LedgerResult<Hash>;

    async fn minimum_balance_for_rent_exemption(&self, data_len: u64) -> LedgerResult<u64>;

    /// Submit a signed transaction. Returns its id.
    async fn send_transaction(&self, tx: &Transaction) -> LedgerResult<Signature>;

    /// Whether the transaction has been confirmed.
    async fn confirm_transaction(&self, signature: &Signature) -> LedgerResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(LedgerError::RateLimited.is_retryable());
        assert!(LedgerError::Timeout.is_retryable());
        assert!(LedgerError::Transport("reset".into()).is_retryable());
        assert!(!LedgerError::ExecutionFailed("insufficient funds".into()).is_retryable());
        assert!(!LedgerError::AlreadyProcessed.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<u64, LedgerError>(1)
        };
        assert_eq!(
            with_timeout(Duration::from_secs(1), slow).await,
            Err(LedgerError::Timeout)
        );
        let fast = async { Ok::<u64, LedgerError>(7) };
        assert_eq!(with_timeout(Duration::from_secs(1), fast).await, Ok(7));
    }
}
