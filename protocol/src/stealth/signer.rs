//! Signing with a bare one-time scalar.
//!
//! A detected payment gives us `s = m + h`, not an Ed25519 seed, so the
//! usual `SigningKey` path (seed → SHA-512 → clamp) can't reproduce it.
//! We build the expanded key directly: the scalar as-is, and a nonce
//! prefix derived from the scalar under its own domain. Signatures are
//! ordinary Ed25519 and verify against `s·G` like any other.

use std::fmt;

use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::hazmat::{raw_sign, ExpandedSecretKey};
use ed25519_dalek::VerifyingKey;
use sha2::Sha512;
use zeroize::Zeroize;

use super::StealthError;
use crate::crypto::hash::sha512_with_domain;
use crate::ledger::{Pubkey, Signature, Signer};

const NONCE_PREFIX_DOMAIN: &[u8] = b"meshstealth/stealth-signer-prefix/v1";

/// Signs for a one-time stealth address.
pub struct StealthSigner {
    expanded: ExpandedSecretKey,
    verifying_key: VerifyingKey,
}

impl StealthSigner {
    pub fn from_scalar(scalar: &Scalar) -> Result<Self, StealthError> {
        if *scalar == Scalar::ZERO {
            return Err(StealthError::InvalidSigningKey);
        }
        let mut wide = sha512_with_domain(NONCE_PREFIX_DOMAIN, scalar.as_bytes());
        let mut hash_prefix = [0u8; 32];
        hash_prefix.copy_from_slice(&wide[..32]);
        wide.zeroize();

        let expanded = ExpandedSecretKey {
            scalar: *scalar,
            hash_prefix,
        };
        hash_prefix.zeroize();
        let verifying_key = VerifyingKey::from(&expanded);
        Ok(Self {
            expanded,
            verifying_key,
        })
    }

    /// From the 32-byte canonical scalar encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StealthError> {
        let scalar = crate::crypto::curve::scalar_from_canonical(bytes)?;
        Self::from_scalar(&scalar)
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new(self.verifying_key.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = raw_sign::<Sha512>(&self.expanded, message, &self.verifying_key);
        Signature::new(sig.to_bytes())
    }
}

impl Signer for StealthSigner {
    fn pubkey(&self) -> Pubkey {
        StealthSigner::pubkey(self)
    }

    fn sign_message(&self, message: &[u8]) -> Signature {
        self.sign(message)
    }
}

impl fmt::Debug for StealthSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StealthSigner(pub={})", self.pubkey())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::curve::{encode_point, mul_base, random_scalar};
    use crate::ledger::{sweep_transfer, verify_signature, Hash};
    use crate::stealth::{derive_auto, scan, ScanCandidate, StealthKeyPair};

    #[test]
    fn pubkey_is_scalar_times_base() {
        let s = random_scalar();
        let signer = StealthSigner::from_scalar(&s).unwrap();
        assert_eq!(signer.pubkey().to_bytes(), encode_point(&mul_base(&s)));
    }

    #[test]
    fn signatures_verify_as_plain_ed25519() {
        let signer = StealthSigner::from_scalar(&random_scalar()).unwrap();
        let sig = signer.sign(b"sweep");
        assert!(verify_signature(&signer.pubkey(), b"sweep", &sig));
        assert!(!verify_signature(&signer.pubkey(), b"swoop", &sig));
        // Deterministic, like any Ed25519 signer.
        assert_eq!(sig, signer.sign(b"sweep"));
    }

    #[test]
    fn zero_scalar_rejected() {
        assert!(matches!(
            StealthSigner::from_scalar(&Scalar::ZERO),
            Err(StealthError::InvalidSigningKey)
        ));
        assert!(StealthSigner::from_bytes(&[0xFF; 32]).is_err());
    }

    #[test]
    fn detected_payment_can_sweep() {
        let keys = StealthKeyPair::generate_hybrid();
        let d = derive_auto(&keys.meta_address()).unwrap();
        let candidate = ScanCandidate {
            ephemeral_public: d.ephemeral_public,
            one_time_address: d.one_time_address,
            view_tag: d.view_tag,
            kem_ciphertext: d.kem_ciphertext().cloned(),
        };
        let found = scan(&keys, &candidate).unwrap();
        let signer = found.signer().unwrap();
        assert_eq!(signer.pubkey(), d.one_time_address);

        let tx = sweep_transfer(&signer, &Pubkey::new([9u8; 32]), 1_000, Hash::new([3u8; 32]))
            .unwrap();
        assert!(tx.verify().is_ok());
    }
}
