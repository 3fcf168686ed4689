//! # Pending Payments
//!
//! Payments one side knows about but the ledger doesn't yet. Status only
//! moves forward, with one loop for retries:
//!
//! ```text
//! Received --> Settling --> Settled
//!    |            |
//!    |            v
//!    |          Failed --> Settling (retry)
//!    |            |
//!    +------------+------> Expired
//! ```
//!
//! Each payment is a separate blob under `pending/<id>`. Transitions are
//! read-check-write under one lock, so two settlers can't both move the
//! same payment into `Settling`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::payload::StealthPaymentPayload;
use super::SettlementError;
use crate::config::{now_millis, PROTOCOL_VERSION_DURABLE};
use crate::ledger::{Pubkey, Signature};
use crate::storage::{self, KeyValueStore};

const KEY_PREFIX: &str = "pending/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Received,
    Settling,
    Settled,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Received, Settling)
                | (Received, Expired)
                | (Settling, Settled)
                | (Settling, Failed)
                | (Failed, Settling)
                | (Failed, Expired)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Expired)
    }
}

/// Who put the transaction on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettledBy {
    Sender,
    Receiver,
}

impl SettledBy {
    pub fn counterparty(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
    /// The one-time address in base58. Both parties derive the same id.
    pub id: String,
    pub one_time_address: Pubkey,
    pub amount: u64,
    pub token_mint: Option<Pubkey>,
    /// Decrypted memo, receiver side only.
    pub memo: Option<String>,
    pub protocol_version: u8,
    pub pre_signed_tx: Option<Vec<u8>>,
    pub nonce_account: Option<Pubkey>,
    pub status: PaymentStatus,
    pub attempts: u32,
    pub settled_by: Option<SettledBy>,
    pub signature: Option<Signature>,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PendingPayment {
    pub fn from_payload(payload: &StealthPaymentPayload, memo: Option<String>, now: u64) -> Self {
        Self {
            id: payload.one_time_address.to_string(),
            one_time_address: payload.one_time_address,
            amount: payload.amount,
            token_mint: payload.token_mint,
            memo,
            protocol_version: payload.protocol_version,
            pre_signed_tx: payload.pre_signed_tx.clone(),
            nonce_account: payload.nonce_account,
            status: PaymentStatus::Received,
            attempts: 0,
            settled_by: None,
            signature: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The sender can always settle: without a pre-signed transaction it
    /// falls back to an immediate transfer.
    pub fn can_settle_as(&self, party: SettledBy) -> bool {
        match party {
            SettledBy::Sender => true,
            SettledBy::Receiver => {
                self.protocol_version >= PROTOCOL_VERSION_DURABLE
                    && self.pre_signed_tx.is_some()
                    && self.nonce_account.is_some()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct PendingPaymentStore {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl PendingPaymentStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn key(id: &str) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    pub fn insert(&self, payment: &PendingPayment) -> Result<(), SettlementError> {
        let _guard = self.write_lock.lock();
        let key = Self::key(&payment.id);
        if self.store.get(&key)?.is_some() {
            return Err(SettlementError::AlreadyExists(payment.id.clone()));
        }
        storage::save(self.store.as_ref(), &key, payment)?;
        debug!(id = %payment.id, amount = payment.amount, "pending payment recorded");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PendingPayment>, SettlementError> {
        Ok(storage::load(self.store.as_ref(), &Self::key(id))?)
    }

    /// Overwrite a payment. A status change must be a legal transition.
    pub fn update(&self, payment: &PendingPayment) -> Result<(), SettlementError> {
        let _guard = self.write_lock.lock();
        let key = Self::key(&payment.id);
        let current: PendingPayment = storage::load(self.store.as_ref(), &key)?
            .ok_or_else(|| SettlementError::NotFound(payment.id.clone()))?;
        if current.status != payment.status && !current.status.can_transition_to(payment.status) {
            return Err(SettlementError::InvalidTransition {
                from: current.status,
                to: payment.status,
            });
        }
        storage::save(self.store.as_ref(), &key, payment)?;
        Ok(())
    }

    /// Atomically move `id` to `next`, applying `edit` to the record.
    pub fn transition<F>(
        &self,
        id: &str,
        next: PaymentStatus,
        edit: F,
    ) -> Result<PendingPayment, SettlementError>
    where
        F: FnOnce(&mut PendingPayment),
    {
        let _guard = self.write_lock.lock();
        let key = Self::key(id);
        let mut payment: PendingPayment = storage::load(self.store.as_ref(), &key)?
            .ok_or_else(|| SettlementError::NotFound(id.to_string()))?;
        if !payment.status.can_transition_to(next) {
            return Err(SettlementError::InvalidTransition {
                from: payment.status,
                to: next,
            });
        }
        payment.status = next;
        payment.updated_at = now_millis();
        edit(&mut payment);
        storage::save(self.store.as_ref(), &key, &payment)?;
        debug!(id, status = ?next, "pending payment transitioned");
        Ok(payment)
    }

    pub fn remove(&self, id: &str) -> Result<(), SettlementError> {
        let _guard = self.write_lock.lock();
        self.store.delete(&Self::key(id))?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<PendingPayment>, SettlementError> {
        let mut out = Vec::new();
        for key in self.store.keys_with_prefix(KEY_PREFIX)? {
            if let Some(payment) = storage::load(self.store.as_ref(), &key)? {
                out.push(payment);
            }
        }
        Ok(out)
    }

    pub fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<PendingPayment>, SettlementError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.status == status)
            .collect())
    }
}
