//! # ML-KEM-768
//!
//! Thin wrapper over `pqcrypto-kyber`'s kyber768 parameter set, which has
//! the ML-KEM-768 sizes: 1184-byte encapsulation key, 2400-byte
//! decapsulation key, 1088-byte ciphertext, 32-byte shared secret.
//!
//! Decapsulation uses implicit rejection: a tampered ciphertext yields a
//! pseudo-random secret instead of an error. Callers find out when the
//! derived address doesn't match, which is exactly what a scanner wants.

use std::fmt;

use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::config::{
    KEM_CIPHERTEXT_LENGTH, KEM_PUBLIC_KEY_LENGTH, KEM_SECRET_KEY_LENGTH, KEM_SHARED_SECRET_LENGTH,
};

/// KEM failures. All of them are input-shape problems.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KemError {
    #[error("invalid KEM public key length: expected 1184, got {0}")]
    InvalidPublicKey(usize),

    #[error("invalid KEM secret key length: expected 2400, got {0}")]
    InvalidSecretKey(usize),

    #[error("invalid KEM ciphertext length: expected 1088, got {0}")]
    InvalidCiphertext(usize),
}

/// The 32-byte shared secret. Wiped on drop.
pub type KemSharedSecret = Zeroizing<[u8; KEM_SHARED_SECRET_LENGTH]>;

// ---------------------------------------------------------------------------
// Key Pair
// ---------------------------------------------------------------------------

/// An ML-KEM-768 key pair. The secret half is zeroized on drop.
#[derive(Clone)]
pub struct KemKeyPair {
    public_key: Vec<u8>,
    secret_key: Zeroizing<Vec<u8>>,
}

impl KemKeyPair {
    /// Fresh key pair from the library's internal RNG.
    pub fn generate() -> Self {
        let (pk, sk) = kyber768::keypair();
        Self {
            public_key: pk.as_bytes().to_vec(),
            secret_key: Zeroizing::new(sk.as_bytes().to_vec()),
        }
    }

    /// Rebuild from stored bytes. Both halves are length-checked.
    pub fn from_bytes(public_key: &[u8], secret_key: &[u8]) -> Result<Self, KemError> {
        if public_key.len() != KEM_PUBLIC_KEY_LENGTH {
            return Err(KemError::InvalidPublicKey(public_key.len()));
        }
        if secret_key.len() != KEM_SECRET_KEY_LENGTH {
            return Err(KemError::InvalidSecretKey(secret_key.len()));
        }
        Ok(Self {
            public_key: public_key.to_vec(),
            secret_key: Zeroizing::new(secret_key.to_vec()),
        })
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Raw decapsulation key. Only for handing to secure storage.
    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }

    /// Recover the shared secret from a ciphertext.
    pub fn decapsulate(&self, ciphertext: &KemCiphertext) -> Result<KemSharedSecret, KemError> {
        let sk = kyber768::SecretKey::from_bytes(&self.secret_key)
            .map_err(|_| KemError::InvalidSecretKey(self.secret_key.len()))?;
        let ct = kyber768::Ciphertext::from_bytes(ciphertext.as_bytes())
            .map_err(|_| KemError::InvalidCiphertext(ciphertext.len()))?;
        let ss = kyber768::decapsulate(&ct, &sk);
        Ok(to_secret(ss.as_bytes()))
    }
}

impl fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KemKeyPair(pk={}…)",
            hex::encode(&self.public_key[..8.min(self.public_key.len())])
        )
    }
}

// ---------------------------------------------------------------------------
// Ciphertext
// ---------------------------------------------------------------------------

/// A 1088-byte ML-KEM-768 ciphertext.
///
/// Construction via [`KemCiphertext::from_bytes`] checks the length; serde
/// deserialization does not, so anything decoded off the wire should go
/// through [`KemCiphertext::validate`] before use.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KemCiphertext(Vec<u8>);

impl KemCiphertext {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KemError> {
        let ct = Self(bytes.to_vec());
        ct.validate()?;
        Ok(ct)
    }

    pub fn validate(&self) -> Result<(), KemError> {
        if self.0.len() != KEM_CIPHERTEXT_LENGTH {
            return Err(KemError::InvalidCiphertext(self.0.len()));
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KemCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KemCiphertext({} bytes)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Encapsulation
// ---------------------------------------------------------------------------

/// Encapsulate to a raw public key. Returns the ciphertext and the secret.
pub fn encapsulate(public_key: &[u8]) -> Result<(KemCiphertext, KemSharedSecret), KemError> {
    if public_key.len() != KEM_PUBLIC_KEY_LENGTH {
        return Err(KemError::InvalidPublicKey(public_key.len()));
    }
    let pk = kyber768::PublicKey::from_bytes(public_key)
        .map_err(|_| KemError::InvalidPublicKey(public_key.len()))?;
    let (ss, ct) = kyber768::encapsulate(&pk);
    Ok((KemCiphertext(ct.as_bytes().to_vec()), to_secret(ss.as_bytes())))
}

fn to_secret(bytes: &[u8]) -> KemSharedSecret {
    let mut out = [0u8; KEM_SHARED_SECRET_LENGTH];
    let n = bytes.len().min(KEM_SHARED_SECRET_LENGTH);
    out[..n].copy_from_slice(&bytes[..n]);
    let secret = Zeroizing::new(out);
    out.zeroize();
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_ml_kem_768() {
        let kp = KemKeyPair::generate();
        assert_eq!(kp.public_key().len(), KEM_PUBLIC_KEY_LENGTH);
        assert_eq!(kp.secret_key_bytes().len(), KEM_SECRET_KEY_LENGTH);
        let (ct, _) = encapsulate(kp.public_key()).unwrap();
        assert_eq!(ct.len(), KEM_CIPHERTEXT_LENGTH);
    }

    #[test]
    fn encapsulate_decapsulate_agree() {
        let kp = KemKeyPair::generate();
        let (ct, sender_secret) = encapsulate(kp.public_key()).unwrap();
        let receiver_secret = kp.decapsulate(&ct).unwrap();
        assert_eq!(*sender_secret, *receiver_secret);
    }

    #[test]
    fn wrong_key_gets_different_secret() {
        let alice = KemKeyPair::generate();
        let mallory = KemKeyPair::generate();
        let (ct, secret) = encapsulate(alice.public_key()).unwrap();
        // Implicit rejection: no error, just garbage.
        let wrong = mallory.decapsulate(&ct).unwrap();
        assert_ne!(*secret, *wrong);
    }

    #[test]
    fn tampered_ciphertext_gets_different_secret() {
        let kp = KemKeyPair::generate();
        let (ct, secret) = encapsulate(kp.public_key()).unwrap();
        let mut bytes = ct.as_bytes().to_vec();
        bytes[100] ^= 0x01;
        let tampered = KemCiphertext::from_bytes(&bytes).unwrap();
        assert_ne!(*secret, *kp.decapsulate(&tampered).unwrap());
    }

    #[test]
    fn length_checks() {
        assert_eq!(
            encapsulate(&[0u8; 32]).unwrap_err(),
            KemError::InvalidPublicKey(32)
        );
        assert_eq!(
            KemCiphertext::from_bytes(&[0u8; 1087]).unwrap_err(),
            KemError::InvalidCiphertext(1087)
        );
        assert!(KemKeyPair::from_bytes(&[0u8; 1184], &[0u8; 10]).is_err());
    }

    #[test]
    fn keypair_restores_from_bytes() {
        let kp = KemKeyPair::generate();
        let restored = KemKeyPair::from_bytes(kp.public_key(), kp.secret_key_bytes()).unwrap();
        let (ct, secret) = encapsulate(restored.public_key()).unwrap();
        assert_eq!(*secret, *kp.decapsulate(&ct).unwrap());
    }
}
