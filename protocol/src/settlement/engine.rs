//! # Settlement Engine
//!
//! Pushes pending payments onto the ledger. Either party can call
//! [`SettlementEngine::settle`] for a durable payment; whoever's broadcast
//! lands first wins and the other gets `AlreadyProcessed`, which is
//! recorded as settled by the counterparty rather than as a failure.
//!
//! A payment that arrived without a pre-signed transaction can only be
//! settled by its sender, immediately, with a plain transfer from the
//! wallet given to [`SettlementEngine::with_sender_wallet`].
//!
//! Rate limiting is handled inside one attempt with a doubling backoff.
//! Any other ledger failure ends the attempt in `Failed`, and the caller
//! may try again until `max_attempts` is reached.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::nonce_pool::{NoncePool, NonceError, NonceState};
use super::pending::{PaymentStatus, PendingPayment, PendingPaymentStore, SettledBy};
use super::SettlementError;
use crate::config::{
    now_millis, LEDGER_REQUEST_TIMEOUT, PENDING_PAYMENT_MAX_AGE, RATE_LIMIT_BACKOFF,
    RATE_LIMIT_MAX_RETRIES, SETTLEMENT_MAX_ATTEMPTS,
};
use crate::crypto::LedgerKeypair;
use crate::ledger::{
    immediate_transfer, with_timeout, LedgerClient, LedgerError, LedgerResult, Signature,
    Transaction,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Broadcast attempts per payment before giving up for good.
    pub max_attempts: u32,
    pub request_timeout_ms: u64,
    /// First pause after a rate-limit response. Doubles on each retry.
    pub rate_limit_backoff_ms: u64,
    pub rate_limit_max_retries: u32,
    /// Unsettled payments older than this are expired.
    pub max_pending_age_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: SETTLEMENT_MAX_ATTEMPTS,
            request_timeout_ms: LEDGER_REQUEST_TIMEOUT.as_millis() as u64,
            rate_limit_backoff_ms: RATE_LIMIT_BACKOFF.as_millis() as u64,
            rate_limit_max_retries: RATE_LIMIT_MAX_RETRIES,
            max_pending_age_ms: PENDING_PAYMENT_MAX_AGE.as_millis() as u64,
        }
    }
}

pub struct SettlementEngine {
    ledger: Arc<dyn LedgerClient>,
    payments: Arc<PendingPaymentStore>,
    /// The sender's own pool. Receivers run without one.
    pool: Option<Arc<NoncePool>>,
    /// Funds immediate settlements and signs nonce cancellations.
    wallet: Option<LedgerKeypair>,
    config: SettlementConfig,
}

/// How one attempt puts a payment on the ledger.
enum Plan<'a> {
    Presigned(Transaction),
    Immediate(&'a LedgerKeypair),
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        payments: Arc<PendingPaymentStore>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            payments,
            pool: None,
            wallet: None,
            config,
        }
    }

    pub fn with_nonce_pool(mut self, pool: Arc<NoncePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_sender_wallet(mut self, wallet: LedgerKeypair) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn payments(&self) -> &Arc<PendingPaymentStore> {
        &self.payments
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Broadcast the pre-signed transaction of payment `id` as `party`, or
    /// for a sender holding a payment without one, a fresh transfer.
    ///
    /// Settling an already settled payment returns it unchanged.
    pub async fn settle(
        &self,
        id: &str,
        party: SettledBy,
    ) -> Result<PendingPayment, SettlementError> {
        let payment = self
            .payments
            .get(id)?
            .ok_or_else(|| SettlementError::NotFound(id.to_string()))?;
        if payment.status == PaymentStatus::Settled {
            return Ok(payment);
        }
        if party == SettledBy::Receiver && !payment.can_settle_as(SettledBy::Receiver) {
            return Err(SettlementError::ReceiverSettlementUnsupported(
                payment.protocol_version,
            ));
        }
        if payment.attempts >= self.config.max_attempts {
            return Err(SettlementError::AttemptsExhausted(payment.attempts));
        }
        let plan = match (payment.pre_signed_tx.as_deref(), &self.wallet) {
            (Some(bytes), _) => Plan::Presigned(Transaction::deserialize(bytes)?),
            (None, Some(wallet)) if party == SettledBy::Sender => Plan::Immediate(wallet),
            (None, _) => return Err(SettlementError::NoPresignedTransaction(id.to_string())),
        };

        let payment = self
            .payments
            .transition(id, PaymentStatus::Settling, |p| {
                p.attempts += 1;
                p.last_error = None;
            })?;
        debug!(id, attempt = payment.attempts, ?party, "settling payment");

        let outcome = match plan {
            Plan::Presigned(tx) => match self.broadcast(&tx).await {
                Ok(signature) => Ok((party, signature)),
                Err(LedgerError::AlreadyProcessed) => {
                    info!(id, "payment already on ledger, counterparty settled first");
                    Ok((party.counterparty(), tx.id().copied().unwrap_or_default()))
                }
                Err(e) => Err(e.into()),
            },
            Plan::Immediate(wallet) => self
                .settle_immediately(wallet, &payment)
                .await
                .map(|signature| (party, signature)),
        };

        match outcome {
            Ok((settled_by, signature)) => self.finish(&payment, settled_by, signature),
            Err(e) => {
                warn!(id, attempt = payment.attempts, error = %e, "settlement attempt failed");
                let reason = e.to_string();
                self.payments.transition(id, PaymentStatus::Failed, |p| {
                    p.last_error = Some(reason);
                })?;
                Err(e)
            }
        }
    }

    async fn settle_immediately(
        &self,
        wallet: &LedgerKeypair,
        payment: &PendingPayment,
    ) -> Result<Signature, SettlementError> {
        let limit = Duration::from_millis(self.config.request_timeout_ms);
        let blockhash = with_timeout(limit, self.ledger.get_latest_blockhash()).await?;
        let tx = immediate_transfer(wallet, &payment.one_time_address, payment.amount, blockhash)?;
        debug!(id = %payment.id, "no pre-signed transaction, paying directly");
        match self.broadcast(&tx).await {
            // Only our own earlier send can have this signature.
            Err(LedgerError::AlreadyProcessed) => Ok(tx.id().copied().unwrap_or_default()),
            other => Ok(other?),
        }
    }

    /// Settle every payment `party` is allowed to broadcast, concurrently.
    pub async fn settle_all(
        &self,
        party: SettledBy,
    ) -> Result<Vec<(String, Result<PendingPayment, SettlementError>)>, SettlementError> {
        let eligible: Vec<String> = self
            .payments
            .list()?
            .into_iter()
            .filter(|p| matches!(p.status, PaymentStatus::Received | PaymentStatus::Failed))
            .filter(|p| p.attempts < self.config.max_attempts && p.can_settle_as(party))
            .filter(|p| p.pre_signed_tx.is_some() || self.wallet.is_some())
            .map(|p| p.id)
            .collect();

        let results = join_all(eligible.iter().map(|id| self.settle(id, party))).await;
        Ok(eligible.into_iter().zip(results).collect())
    }

    /// Expire unsettled payments created more than `max_pending_age_ms`
    /// before `now`. Returns the expired ids.
    pub fn expire_stale(&self, now: u64) -> Result<Vec<String>, SettlementError> {
        let mut expired = Vec::new();
        for payment in self.payments.list()? {
            let stale = now.saturating_sub(payment.created_at) > self.config.max_pending_age_ms;
            if stale && payment.status.can_transition_to(PaymentStatus::Expired) {
                self.payments
                    .transition(&payment.id, PaymentStatus::Expired, |_| {})?;
                expired.push(payment.id);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale payments");
        }
        Ok(expired)
    }

    /// Return the nonces of expired payments to the pool, voiding their
    /// pre-signed transfers on the ledger. Needs both a pool and a sender
    /// wallet; without them there is nothing to cancel. Returns how many
    /// nonces came back.
    pub async fn cancel_expired_nonces(&self) -> Result<usize, SettlementError> {
        let (Some(pool), Some(wallet)) = (&self.pool, &self.wallet) else {
            return Ok(0);
        };
        let mut cancelled = 0;
        for payment in self.payments.list_by_status(PaymentStatus::Expired)? {
            let Some(nonce) = payment.nonce_account else {
                continue;
            };
            if pool.get(&nonce).map(|e| e.state) != Some(NonceState::Signed) {
                continue;
            }
            match pool.cancel_signed(wallet, &nonce).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!(id = %payment.id, error = %e, "could not cancel expired nonce"),
            }
        }
        Ok(cancelled)
    }

    /// Run [`Self::expire_stale`] and then [`Self::cancel_expired_nonces`]
    /// every `period` until the handle is aborted.
    pub fn spawn_expiry_task(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.expire_stale(now_millis()) {
                    warn!(error = %e, "payment expiry sweep failed");
                }
                if let Err(e) = self.cancel_expired_nonces().await {
                    warn!(error = %e, "expired nonce cancellation failed");
                }
            }
        })
    }

    // -- internals ---------------------------------------------------------

    async fn broadcast(&self, tx: &Transaction) -> LedgerResult<Signature> {
        let limit = Duration::from_millis(self.config.request_timeout_ms);
        let mut backoff = Duration::from_millis(self.config.rate_limit_backoff_ms);
        let mut retries = 0;
        loop {
            match with_timeout(limit, self.ledger.send_transaction(tx)).await {
                Err(LedgerError::RateLimited) if retries < self.config.rate_limit_max_retries => {
                    retries += 1;
                    warn!(retries, backoff_ms = backoff.as_millis() as u64, "rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(LedgerError::Timeout) => return self.confirm_after_timeout(tx).await,
                other => return other,
            }
        }
    }

    /// A timed-out send may still have landed. Ask once before calling it
    /// a failure.
    async fn confirm_after_timeout(&self, tx: &Transaction) -> LedgerResult<Signature> {
        let signature = *tx.id().ok_or(LedgerError::Timeout)?;
        let limit = Duration::from_millis(self.config.request_timeout_ms);
        match with_timeout(limit, self.ledger.confirm_transaction(&signature)).await {
            Ok(true) => Ok(signature),
            _ => Err(LedgerError::Timeout),
        }
    }

    fn finish(
        &self,
        payment: &PendingPayment,
        settled_by: SettledBy,
        signature: Signature,
    ) -> Result<PendingPayment, SettlementError> {
        let settled = self
            .payments
            .transition(&payment.id, PaymentStatus::Settled, |p| {
                p.settled_by = Some(settled_by);
                p.signature = Some(signature);
            })?;
        info!(id = %payment.id, ?settled_by, tx = %signature, "payment settled");

        if let (Some(pool), Some(nonce)) = (&self.pool, payment.nonce_account) {
            match pool.mark_consumed(&nonce) {
                Ok(()) | Err(NonceError::UnknownAccount(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(settled)
    }
}
