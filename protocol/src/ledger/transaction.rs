//! Signed transactions and their wire format.
//!
//! ```text
//! shortvec<[u8; 64]> signatures
//! message
//! ```
//!
//! Signature `i` is over the serialized message by `account_keys[i]`.

use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use super::message::{read_array, Message};
use super::pubkey::{Pubkey, Signature};
use super::shortvec;
use super::CodecError;

/// Anything that can sign a message for a given address.
///
/// Implemented by the wallet's [`LedgerKeypair`](crate::crypto::LedgerKeypair)
/// and by [`StealthSigner`](crate::stealth::StealthSigner) for one-time
/// addresses.
pub trait Signer {
    fn pubkey(&self) -> Pubkey;
    fn sign_message(&self, message: &[u8]) -> Signature;
}

/// A message plus one signature slot per required signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    /// Wrap a message with all-zero signature placeholders.
    pub fn new_unsigned(message: Message) -> Self {
        let n = message.header.num_required_signatures as usize;
        Self {
            signatures: vec![Signature::default(); n],
            message,
        }
    }

    /// Fill in the signature slots belonging to `signers`.
    ///
    /// A signer whose key is not a required signer is an error. Signing
    /// only some slots is fine; [`Transaction::is_fully_signed`] tells you
    /// whether you're done.
    pub fn sign(&mut self, signers: &[&dyn Signer]) -> Result<(), CodecError> {
        let payload = self.message.serialize()?;
        for signer in signers {
            let pubkey = signer.pubkey();
            let slot = self
                .message
                .signer_keys()
                .iter()
                .position(|k| *k == pubkey)
                .ok_or(CodecError::UnknownSigner(pubkey))?;
            self.signatures[slot] = signer.sign_message(&payload);
        }
        Ok(())
    }

    /// Every required signature slot is filled.
    pub fn is_fully_signed(&self) -> bool {
        self.signatures.len() == self.message.header.num_required_signatures as usize
            && self.signatures.iter().all(|s| !s.is_placeholder())
    }

    /// Check every signature against its key. Placeholders fail.
    pub fn verify(&self) -> Result<(), CodecError> {
        let expected = self.message.header.num_required_signatures as usize;
        if self.signatures.len() != expected {
            return Err(CodecError::SignatureCountMismatch {
                expected,
                got: self.signatures.len(),
            });
        }
        let payload = self.message.serialize()?;
        for (sig, key) in self.signatures.iter().zip(self.message.signer_keys()) {
            if !verify_signature(key, &payload, sig) {
                return Err(CodecError::InvalidSignature(*key));
            }
        }
        Ok(())
    }

    /// The transaction id: the fee payer's signature.
    pub fn id(&self) -> Option<&Signature> {
        self.signatures.first()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        let message = self.message.serialize()?;
        let mut out = Vec::with_capacity(1 + self.signatures.len() * 64 + message.len());
        shortvec::encode_len(self.signatures.len(), &mut out)?;
        for sig in &self.signatures {
            out.extend_from_slice(sig.as_bytes());
        }
        out.extend_from_slice(&message);
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut offset = 0;
        let count = shortvec::decode_len(bytes, &mut offset)?;
        let mut signatures = Vec::with_capacity(count.min(8));
        for _ in 0..count {
            signatures.push(Signature::new(read_array::<64>(bytes, &mut offset)?));
        }
        let message = Message::deserialize_from(bytes, &mut offset)?;
        if offset != bytes.len() {
            return Err(CodecError::TrailingBytes);
        }
        let expected = message.header.num_required_signatures as usize;
        if signatures.len() != expected {
            return Err(CodecError::SignatureCountMismatch {
                expected,
                got: signatures.len(),
            });
        }
        Ok(Self {
            signatures,
            message,
        })
    }
}

/// Plain Ed25519 verification of `signature` over `message` by `pubkey`.
pub fn verify_signature(pubkey: &Pubkey, message: &[u8], signature: &Signature) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(pubkey.as_bytes()) else {
        return false;
    };
    let sig = DalekSignature::from_bytes(signature.as_bytes());
    key.verify(message, &sig).is_ok()
}
