//! The stealth payment payload: what a sender floods into the mesh.
//!
//! Everything a recipient needs to detect the payment, read the memo and,
//! from version 2 on, broadcast the pre-signed transfer itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{PROTOCOL_VERSION, PROTOCOL_VERSION_DURABLE, PROTOCOL_VERSION_LEGACY};
use crate::crypto::KemCiphertext;
use crate::ledger::{CodecError, DurableTransferSummary, Pubkey, Transaction};
use crate::stealth::{ScanCandidate, StealthDerivation, StealthError};

/// Payload decoding and consistency failures.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload serialization error: {0}")]
    Serialization(String),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid pre-signed transaction: {0}")]
    InvalidTransaction(#[from] CodecError),

    #[error("pre-signed transaction does not match payload: {0}")]
    Inconsistent(&'static str),
}

/// A stealth payment as carried in a mesh `Payment` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealthPaymentPayload {
    pub protocol_version: u8,
    pub one_time_address: Pubkey,
    pub ephemeral_public: [u8; 32],
    pub kem_ciphertext: Option<KemCiphertext>,
    pub view_tag: u8,
    /// Lamports, or base units of `token_mint`.
    pub amount: u64,
    pub token_mint: Option<Pubkey>,
    pub encrypted_memo: Option<Vec<u8>>,
    /// Wire bytes of a durable-nonce transfer to `one_time_address`.
    pub pre_signed_tx: Option<Vec<u8>>,
    pub nonce_account: Option<Pubkey>,
}

impl StealthPaymentPayload {
    /// A sender-only payload for a derived address. Attach a durable
    /// transaction with [`Self::with_durable_transaction`].
    pub fn from_derivation(derivation: &StealthDerivation, amount: u64) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION_LEGACY,
            one_time_address: derivation.one_time_address,
            ephemeral_public: derivation.ephemeral_public,
            kem_ciphertext: derivation.kem_ciphertext().cloned(),
            view_tag: derivation.view_tag,
            amount,
            token_mint: None,
            encrypted_memo: None,
            pre_signed_tx: None,
            nonce_account: None,
        }
    }

    pub fn with_memo(mut self, encrypted_memo: Vec<u8>) -> Self {
        self.encrypted_memo = Some(encrypted_memo);
        self
    }

    pub fn with_token_mint(mut self, mint: Pubkey) -> Self {
        self.token_mint = Some(mint);
        self
    }

    /// Attach a pre-signed durable transfer and upgrade to version 2.
    pub fn with_durable_transaction(
        mut self,
        tx: &Transaction,
        nonce_account: Pubkey,
    ) -> Result<Self, PayloadError> {
        self.pre_signed_tx = Some(tx.serialize()?);
        self.nonce_account = Some(nonce_account);
        self.protocol_version = PROTOCOL_VERSION;
        Ok(self)
    }

    /// Either party may broadcast: version 2+ with a transaction and its
    /// nonce account attached.
    pub fn receiver_can_settle(&self) -> bool {
        self.protocol_version >= PROTOCOL_VERSION_DURABLE
            && self.pre_signed_tx.is_some()
            && self.nonce_account.is_some()
    }

    pub fn scan_candidate(&self) -> Result<ScanCandidate, StealthError> {
        if let Some(ct) = &self.kem_ciphertext {
            ct.validate()?;
        }
        Ok(ScanCandidate {
            ephemeral_public: self.ephemeral_public,
            one_time_address: self.one_time_address,
            view_tag: self.view_tag,
            kem_ciphertext: self.kem_ciphertext.clone(),
        })
    }

    pub fn transaction(&self) -> Result<Option<Transaction>, PayloadError> {
        self.pre_signed_tx
            .as_deref()
            .map(Transaction::deserialize)
            .transpose()
            .map_err(PayloadError::from)
    }

    /// Check the pre-signed transfer says what the payload says: it
    /// advances the stated nonce account, pays the one-time address, and
    /// moves exactly `amount`. `Ok(None)` when there is no transaction.
    pub fn verify_transaction(&self) -> Result<Option<DurableTransferSummary>, PayloadError> {
        let tx = match self.transaction()? {
            Some(tx) => tx,
            None => return Ok(None),
        };
        let summary = DurableTransferSummary::inspect(&tx)?;
        if self.token_mint.is_some() {
            return Err(PayloadError::Inconsistent("token transfers carry no durable transfer"));
        }
        if Some(summary.nonce_account) != self.nonce_account {
            return Err(PayloadError::Inconsistent("nonce account"));
        }
        if summary.recipient != self.one_time_address {
            return Err(PayloadError::Inconsistent("recipient"));
        }
        if summary.lamports != self.amount {
            return Err(PayloadError::Inconsistent("amount"));
        }
        Ok(Some(summary))
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        bincode::serialize(self).map_err(|e| PayloadError::Serialization(e.to_string()))
    }

    /// Decode and check the version is one we understand.
    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let payload: Self =
            bincode::deserialize(bytes).map_err(|e| PayloadError::Serialization(e.to_string()))?;
        if payload.protocol_version < PROTOCOL_VERSION_LEGACY
            || payload.protocol_version > PROTOCOL_VERSION
        {
            return Err(PayloadError::UnsupportedVersion(payload.protocol_version));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::LedgerKeypair;
    use crate::ledger::{durable_transfer, Hash};
    use crate::stealth::{derive_auto, StealthKeyPair};

    fn signed_payload(amount_in_tx: u64, amount_claimed: u64) -> StealthPaymentPayload {
        let keys = StealthKeyPair::generate();
        let d = derive_auto(&keys.meta_address()).unwrap();
        let payer = LedgerKeypair::generate();
        let nonce = Pubkey::new([4u8; 32]);
        let tx = durable_transfer(&payer, &nonce, Hash::new([8u8; 32]), &d.one_time_address, amount_in_tx)
            .unwrap();
        StealthPaymentPayload::from_derivation(&d, amount_claimed)
            .with_durable_transaction(&tx, nonce)
            .unwrap()
    }

    #[test]
    fn durable_payload_is_v2_and_verifies() {
        let payload = signed_payload(1_000, 1_000);
        assert_eq!(payload.protocol_version, PROTOCOL_VERSION_DURABLE);
        assert!(payload.receiver_can_settle());
        let summary = payload.verify_transaction().unwrap().unwrap();
        assert_eq!(summary.recipient, payload.one_time_address);

        let decoded = StealthPaymentPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn amount_mismatch_is_caught() {
        let payload = signed_payload(1_000, 2_000);
        assert!(matches!(
            payload.verify_transaction(),
            Err(PayloadError::Inconsistent("amount"))
        ));
    }

    #[test]
    fn legacy_payload_is_sender_only() {
        let keys = StealthKeyPair::generate_hybrid();
        let d = derive_auto(&keys.meta_address()).unwrap();
        let payload = StealthPaymentPayload::from_derivation(&d, 5);
        assert_eq!(payload.protocol_version, PROTOCOL_VERSION_LEGACY);
        assert!(!payload.receiver_can_settle());
        assert!(payload.verify_transaction().unwrap().is_none());
        assert!(payload.scan_candidate().unwrap().kem_ciphertext.is_some());
    }

    #[test]
    fn unknown_versions_rejected() {
        let mut payload = signed_payload(1, 1);
        payload.protocol_version = 9;
        let bytes = bincode::serialize(&payload).unwrap();
        assert!(matches!(
            StealthPaymentPayload::decode(&bytes),
            Err(PayloadError::UnsupportedVersion(9))
        ));
        assert!(StealthPaymentPayload::decode(&[1, 2, 3]).is_err());
    }
}
