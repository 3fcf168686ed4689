//! # Wallet Keys
//!
//! The ordinary Ed25519 keypair that owns funds on the ledger: it pays
//! fees, funds stealth transfers, and is the authority over the sender's
//! durable nonce accounts.
//!
//! Stealth one-time addresses do *not* use this type. Their secret is a
//! bare scalar with no seed behind it; see `stealth::StealthSigner`.
//!
//! Key bytes are never logged. `Debug` prints the address only.

use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey, SECRET_KEY_LENGTH};
use rand_core::OsRng;
use thiserror::Error;

use crate::ledger::{Pubkey, Signature, Signer};

/// Errors from loading key material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("keypair validation failed: public key does not match secret key")]
    KeypairMismatch,
}

/// An Ed25519 wallet keypair.
///
/// Intentionally not `Serialize`. Exporting a secret key should be a
/// conscious call to [`LedgerKeypair::to_keypair_bytes`], not a side effect
/// of logging a struct.
pub struct LedgerKeypair {
    signing_key: SigningKey,
}

impl LedgerKeypair {
    /// Fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load the 64-byte `seed ‖ public key` layout most wallets export.
    /// The public half must match the seed.
    pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: &[u8; 64] = bytes.try_into().map_err(|_| KeyError::InvalidSecretKey)?;
        let signing_key =
            SigningKey::from_keypair_bytes(arr).map_err(|_| KeyError::KeypairMismatch)?;
        Ok(Self { signing_key })
    }

    /// Same layout, base58 encoded.
    pub fn from_base58(s: &str) -> Result<Self, KeyError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Self::from_keypair_bytes(&bytes)
    }

    /// Export `seed ‖ public key`. Handle with care.
    pub fn to_keypair_bytes(&self) -> [u8; 64] {
        self.signing_key.to_keypair_bytes()
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature::new(self.signing_key.sign(message).to_bytes())
    }
}

impl Signer for LedgerKeypair {
    fn pubkey(&self) -> Pubkey {
        LedgerKeypair::pubkey(self)
    }

    fn sign_message(&self, message: &[u8]) -> Signature {
        self.sign(message)
    }
}

impl Clone for LedgerKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for LedgerKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerKeypair(pub={})", self.pubkey())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::verify_signature;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = LedgerKeypair::generate();
        let sig = kp.sign(b"pay the bakery");
        assert!(verify_signature(&kp.pubkey(), b"pay the bakery", &sig));
        assert!(!verify_signature(&kp.pubkey(), b"pay the casino", &sig));
    }

    #[test]
    fn deterministic_from_seed() {
        let a = LedgerKeypair::from_seed(&[42u8; 32]);
        let b = LedgerKeypair::from_seed(&[42u8; 32]);
        assert_eq!(a.pubkey(), b.pubkey());
        assert_eq!(a.sign(b"m"), b.sign(b"m"));
    }

    #[test]
    fn keypair_bytes_roundtrip() {
        let kp = LedgerKeypair::generate();
        let encoded = bs58::encode(kp.to_keypair_bytes()).into_string();
        let restored = LedgerKeypair::from_base58(&encoded).unwrap();
        assert_eq!(restored.pubkey(), kp.pubkey());
    }

    #[test]
    fn mismatched_public_half_rejected() {
        let kp = LedgerKeypair::generate();
        let other = LedgerKeypair::generate();
        let mut bytes = kp.to_keypair_bytes();
        bytes[32..].copy_from_slice(other.pubkey().as_bytes());
        assert_eq!(
            LedgerKeypair::from_keypair_bytes(&bytes).unwrap_err(),
            KeyError::KeypairMismatch
        );
        assert_eq!(
            LedgerKeypair::from_keypair_bytes(&bytes[..10]).unwrap_err(),
            KeyError::InvalidSecretKey
        );
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = LedgerKeypair::generate();
        let debug = format!("{kp:?}");
        assert!(debug.starts_with("LedgerKeypair(pub="));
        assert!(!debug.contains(&hex::encode(&kp.to_keypair_bytes()[..32])));
    }
}
