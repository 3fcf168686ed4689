//! Building an offline payment on the sender's device.

use std::sync::Arc;

use tracing::{info, warn};

use super::PaymentError;
use crate::config::now_millis;
use crate::crypto::LedgerKeypair;
use crate::ledger::durable_transfer;
use crate::mesh::MeshMessage;
use crate::settlement::{
    NonceEntry, NonceError, NoncePool, PendingPayment, PendingPaymentStore, StealthPaymentPayload,
};
use crate::stealth::{derive_auto, MetaAddress, StealthDerivation};

/// A payment ready to hand to [`MeshNode::submit`](crate::mesh::MeshNode::submit).
#[derive(Debug, Clone)]
pub struct OutgoingPayment {
    pub message: MeshMessage,
    pub payload: StealthPaymentPayload,
    /// The sender's own record, already persisted.
    pub pending: PendingPayment,
}

pub struct OfflinePaymentBuilder {
    peer_id: String,
    wallet: LedgerKeypair,
    pool: Arc<NoncePool>,
    payments: Arc<PendingPaymentStore>,
}

impl OfflinePaymentBuilder {
    /// `wallet` funds payments and must be the pool's nonce authority.
    pub fn new(
        peer_id: impl Into<String>,
        wallet: LedgerKeypair,
        pool: Arc<NoncePool>,
        payments: Arc<PendingPaymentStore>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            wallet,
            pool,
            payments,
        }
    }

    pub fn wallet(&self) -> &LedgerKeypair {
        &self.wallet
    }

    /// Pay `amount` lamports to the base58 meta-address `recipient`.
    ///
    /// Reserves a nonce, pre-signs a durable transfer against it, records
    /// the payment as pending and marks the nonce signed. The reservation
    /// is released again if anything before that last step fails.
    pub async fn build(
        &self,
        recipient: &str,
        amount: u64,
        memo: Option<&str>,
    ) -> Result<OutgoingPayment, PaymentError> {
        if amount == 0 {
            return Err(PaymentError::ZeroAmount);
        }
        if self.wallet.pubkey() != *self.pool.authority() {
            return Err(NonceError::AuthorityMismatch(self.wallet.pubkey()).into());
        }
        let meta: MetaAddress = recipient.parse()?;
        let derivation = derive_auto(&meta)?;
        let encrypted_memo = memo.map(|m| derivation.encrypt_memo(m)).transpose()?;

        let nonce = self.pool.reserve_nonce().await?;
        match self.assemble(&derivation, &nonce, amount, encrypted_memo, memo) {
            Ok(outgoing) => {
                info!(
                    to = %outgoing.pending.one_time_address,
                    amount,
                    hybrid = derivation.is_hybrid(),
                    nonce = %nonce.address,
                    "offline payment built"
                );
                Ok(outgoing)
            }
            Err(e) => {
                if let Err(release) = self.pool.release_nonce(&nonce.address) {
                    warn!(nonce = %nonce.address, error = %release, "could not release nonce");
                }
                Err(e)
            }
        }
    }

    fn assemble(
        &self,
        derivation: &StealthDerivation,
        nonce: &NonceEntry,
        amount: u64,
        encrypted_memo: Option<Vec<u8>>,
        memo: Option<&str>,
    ) -> Result<OutgoingPayment, PaymentError> {
        let tx = durable_transfer(
            &self.wallet,
            &nonce.address,
            nonce.nonce,
            &derivation.one_time_address,
            amount,
        )?;
        let mut payload = StealthPaymentPayload::from_derivation(derivation, amount)
            .with_durable_transaction(&tx, nonce.address)?;
        if let Some(sealed) = encrypted_memo {
            payload = payload.with_memo(sealed);
        }

        let message = MeshMessage::payment(self.peer_id.clone(), payload.encode()?);
        let pending = PendingPayment::from_payload(&payload, memo.map(str::to_owned), now_millis());
        self.payments.insert(&pending)?;
        if let Err(e) = self.pool.mark_signed(&nonce.address) {
            // The transaction never leaves this device, so the nonce is
            // still safe to hand back.
            if let Err(remove) = self.payments.remove(&pending.id) {
                warn!(id = %pending.id, error = %remove, "could not drop unsent payment");
            }
            return Err(e.into());
        }
        Ok(OutgoingPayment {
            message,
            payload,
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SimulatedLedger;
    use crate::settlement::{NoncePoolConfig, NonceState, PaymentStatus};
    use crate::stealth::{scan, StealthKeyPair};
    use crate::storage::MemoryStore;

    async fn builder(pool_size: usize) -> OfflinePaymentBuilder {
        let ledger = Arc::new(SimulatedLedger::new());
        let wallet = LedgerKeypair::generate();
        ledger.airdrop(&wallet.pubkey(), 50_000_000);
        let pool = NoncePool::open(
            wallet.pubkey(),
            NoncePoolConfig {
                target_size: pool_size,
                creation_delay_ms: 0,
                ..NoncePoolConfig::default()
            },
            ledger,
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        pool.replenish_pool(&wallet).await.unwrap();
        OfflinePaymentBuilder::new(
            "alice-phone",
            wallet,
            Arc::new(pool),
            Arc::new(PendingPaymentStore::new(Arc::new(MemoryStore::new()))),
        )
    }

    #[tokio::test]
    async fn builds_durable_payment_for_recipient() {
        let b = builder(1).await;
        let bob = StealthKeyPair::generate_hybrid();
        let out = b
            .build(&bob.meta_address().encode(), 25_000, Some("lunch"))
            .await
            .unwrap();

        assert_eq!(out.message.origin_peer_id, "alice-phone");
        assert!(out.payload.receiver_can_settle());
        let summary = out.payload.verify_transaction().unwrap().unwrap();
        assert_eq!(summary.source, b.wallet().pubkey());
        assert_eq!(summary.lamports, 25_000);

        let detected = scan(&bob, &out.payload.scan_candidate().unwrap()).unwrap();
        let memo = out.payload.encrypted_memo.as_deref().unwrap();
        assert_eq!(detected.decrypt_memo(memo).as_deref(), Some("lunch"));

        assert_eq!(out.pending.status, PaymentStatus::Received);
        assert!(b.payments.get(&out.pending.id).unwrap().is_some());
        assert_eq!(b.pool.count(NonceState::Signed), 1);
    }

    #[tokio::test]
    async fn signed_nonce_is_never_reissued() {
        let b = builder(1).await;
        let bob = StealthKeyPair::generate();
        let addr = bob.meta_address().encode();
        let first = b.build(&addr, 10, None).await.unwrap();
        let nonce = first.payload.nonce_account.unwrap();

        let reserved_at = b.pool.get(&nonce).unwrap().reserved_at.unwrap();
        let timeout = NoncePoolConfig::default().reservation_timeout_ms;
        assert_eq!(
            b.pool
                .release_expired_reservations(reserved_at + timeout + 1)
                .unwrap(),
            0
        );
        let err = b.build(&addr, 10, None).await.unwrap_err();
        assert!(matches!(err, PaymentError::Nonce(NonceError::PoolEmpty)));
        assert_eq!(b.pool.get(&nonce).unwrap().state, NonceState::Signed);
    }

    #[tokio::test]
    async fn empty_pool_is_retryable() {
        let b = builder(1).await;
        let bob = StealthKeyPair::generate();
        let addr = bob.meta_address().encode();
        b.build(&addr, 1, None).await.unwrap();
        let err = b.build(&addr, 1, None).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn bad_input_never_reserves() {
        let b = builder(1).await;
        assert!(matches!(b.build("not base58 0OIl", 5, None).await, Err(PaymentError::Stealth(_))));
        let bob = StealthKeyPair::generate();
        assert!(matches!(
            b.build(&bob.meta_address().encode(), 0, None).await,
            Err(PaymentError::ZeroAmount)
        ));
        let long = "x".repeat(1_000);
        assert!(b.build(&bob.meta_address().encode(), 5, Some(&long)).await.is_err());
        assert_eq!(b.pool.available_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_record_is_rejected() {
        let b = builder(1).await;
        let bob = StealthKeyPair::generate();
        let nonce = b.pool.reserve_nonce().await.unwrap();
        let d = derive_auto(&bob.meta_address()).unwrap();
        b.assemble(&d, &nonce, 5, None, None).unwrap();
        let err = b.assemble(&d, &nonce, 5, None, None).unwrap_err();
        assert!(matches!(err, PaymentError::Settlement(_)));
    }
}
