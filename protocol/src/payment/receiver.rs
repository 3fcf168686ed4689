//! Picking our payments out of mesh traffic.
//!
//! Every payment message a node sees goes through [`PaymentInbox::receive`].
//! Almost all of them belong to someone else, so a miss is silent: no
//! error, no log above `debug`.

use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use crate::config::now_millis;
use crate::mesh::{MeshMessage, MeshNode, MessageType};
use crate::settlement::{
    PendingPayment, PendingPaymentStore, SettlementError, StealthPaymentPayload,
};
use crate::stealth::{scan, DetectedPayment, StealthKeyPair};

/// A payment addressed to us.
#[derive(Debug)]
pub struct ReceivedPayment {
    /// The persisted record.
    pub pending: PendingPayment,
    /// Spend authority over the one-time address.
    pub detected: DetectedPayment,
    /// Acknowledgement addressed to the sender.
    pub ack: MeshMessage,
}

pub struct PaymentInbox {
    peer_id: String,
    keys: Arc<StealthKeyPair>,
    payments: Arc<PendingPaymentStore>,
}

impl PaymentInbox {
    pub fn new(
        peer_id: impl Into<String>,
        keys: Arc<StealthKeyPair>,
        payments: Arc<PendingPaymentStore>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            keys,
            payments,
        }
    }

    pub fn payments(&self) -> &Arc<PendingPaymentStore> {
        &self.payments
    }

    /// Decode, scan, validate and record. `None` unless the message is a
    /// new, consistent payment to our keys.
    pub fn receive(&self, message: &MeshMessage) -> Option<ReceivedPayment> {
        if message.message_type != MessageType::Payment {
            return None;
        }
        let payload = match StealthPaymentPayload::decode(&message.payload) {
            Ok(p) => p,
            Err(e) => {
                debug!(id = %message.id, error = %e, "undecodable payment payload");
                return None;
            }
        };
        let candidate = match payload.scan_candidate() {
            Ok(c) => c,
            Err(e) => {
                debug!(id = %message.id, error = %e, "malformed scan fields");
                return None;
            }
        };
        let detected = scan(&self.keys, &candidate)?;

        if let Err(e) = payload.verify_transaction() {
            debug!(id = %message.id, error = %e, "pre-signed transaction rejected");
            return None;
        }

        let memo = payload
            .encrypted_memo
            .as_deref()
            .and_then(|sealed| detected.decrypt_memo(sealed));
        let pending = PendingPayment::from_payload(&payload, memo, now_millis());
        match self.payments.insert(&pending) {
            Ok(()) => {}
            Err(SettlementError::AlreadyExists(id)) => {
                debug!(id = %id, "payment already recorded");
                return None;
            }
            Err(e) => {
                warn!(id = %pending.id, error = %e, "could not record incoming payment");
                return None;
            }
        }

        info!(
            id = %pending.id,
            amount = pending.amount,
            receiver_settleable = payload.receiver_can_settle(),
            "incoming stealth payment"
        );
        Some(ReceivedPayment {
            ack: MeshMessage::ack(self.peer_id.clone(), message),
            pending,
            detected,
        })
    }

    /// Feed every message `node` delivers through this inbox and send the
    /// acks back over the mesh. The node is held weakly.
    pub fn attach(self: &Arc<Self>, node: &Arc<MeshNode>) {
        let inbox = Arc::clone(self);
        let weak: Weak<MeshNode> = Arc::downgrade(node);
        node.on_message_received(move |message| {
            let Some(ReceivedPayment { ack, .. }) = inbox.receive(message) else {
                return;
            };
            let Some(node) = weak.upgrade() else {
                return;
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = node.submit(ack).await {
                            warn!(error = %e, "failed to send payment ack");
                        }
                    });
                }
                Err(_) => warn!("no runtime to send payment ack on"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::LedgerKeypair;
    use crate::ledger::{durable_transfer, Hash, Pubkey};
    use crate::settlement::PaymentStatus;
    use crate::stealth::derive_auto;
    use crate::storage::MemoryStore;

    fn inbox(keys: &Arc<StealthKeyPair>) -> PaymentInbox {
        PaymentInbox::new(
            "bob-phone",
            keys.clone(),
            Arc::new(PendingPaymentStore::new(Arc::new(MemoryStore::new()))),
        )
    }

    fn payment_message(keys: &StealthKeyPair, amount: u64, claimed: u64) -> MeshMessage {
        let d = derive_auto(&keys.meta_address()).unwrap();
        let payer = LedgerKeypair::generate();
        let nonce = Pubkey::new([3u8; 32]);
        let tx = durable_transfer(&payer, &nonce, Hash::new([6u8; 32]), &d.one_time_address, amount)
            .unwrap();
        let payload = StealthPaymentPayload::from_derivation(&d, claimed)
            .with_durable_transaction(&tx, nonce)
            .unwrap()
            .with_memo(d.encrypt_memo("rent").unwrap());
        MeshMessage::payment("alice-phone", payload.encode().unwrap())
    }

    #[test]
    fn own_payment_is_recorded_and_acked() {
        let keys = Arc::new(StealthKeyPair::generate_hybrid());
        let inbox = inbox(&keys);
        let msg = payment_message(&keys, 700, 700);

        let got = inbox.receive(&msg).unwrap();
        assert_eq!(got.pending.status, PaymentStatus::Received);
        assert_eq!(got.pending.memo.as_deref(), Some("rent"));
        assert_eq!(got.detected.one_time_address(), &got.pending.one_time_address);
        assert_eq!(got.ack.acked_id(), Some(msg.id));
        assert_eq!(got.ack.target_peer_id.as_deref(), Some("alice-phone"));

        // A resend of the same payment is not reported twice.
        assert!(inbox.receive(&msg).is_none());
        assert_eq!(inbox.payments().list().unwrap().len(), 1);
    }

    #[test]
    fn foreign_payments_are_ignored() {
        let mine = Arc::new(StealthKeyPair::generate());
        let theirs = StealthKeyPair::generate();
        let inbox = inbox(&mine);
        assert!(inbox.receive(&payment_message(&theirs, 5, 5)).is_none());
        assert!(inbox.payments().list().unwrap().is_empty());
    }

    #[test]
    fn inconsistent_or_garbage_payloads_are_dropped() {
        let keys = Arc::new(StealthKeyPair::generate());
        let inbox = inbox(&keys);
        assert!(inbox.receive(&payment_message(&keys, 5, 9)).is_none());
        assert!(inbox
            .receive(&MeshMessage::payment("x", vec![0xde, 0xad]))
            .is_none());

        let mut not_payment = payment_message(&keys, 5, 5);
        not_payment.message_type = MessageType::Discovery;
        assert!(inbox.receive(&not_payment).is_none());
    }
}
