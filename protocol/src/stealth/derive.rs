//! # Sender-side Derivation
//!
//! Given a recipient's meta-address `(M, V [, kem_pk])`:
//!
//! ```text
//! r        ← random scalar            R = r·G
//! ecdh     = compress(r·V)
//! secret   = ecdh                                   (classical)
//!          = HKDF(ecdh ‖ kem_ss, info)              (hybrid)
//! digest   = SHA-256(domain ‖ secret)
//! h        = digest mod ℓ             view_tag = digest[0]
//! P        = M + h·G
//! ```
//!
//! `P` is the one-time address the funds go to. The sender throws `r`
//! away; only the recipient, holding `v` (and the KEM secret), can
//! recompute `secret` from `R`.

use std::fmt;

use curve25519_dalek::scalar::Scalar;
use tracing::trace;
use zeroize::{Zeroize, Zeroizing};

use super::meta_address::MetaAddress;
use super::StealthError;
use crate::config::{HYBRID_KDF_INFO, MAX_MEMO_LENGTH, MEMO_KEY_CONTEXT, STEALTH_HASH_DOMAIN};
use crate::crypto::curve::{encode_point, mul_base, random_scalar, scalar_from_hash};
use crate::crypto::encryption;
use crate::crypto::hash::{domain_separated_hash, hkdf_sha256, sha256_with_domain};
use crate::crypto::kem::{self, KemCiphertext};
use crate::ledger::Pubkey;

/// Which derivation produced a one-time address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StealthMode {
    Classical,
    /// Carries the KEM ciphertext the recipient needs to decapsulate.
    Hybrid(KemCiphertext),
}

/// Everything the sender needs to pay and notify the recipient.
pub struct StealthDerivation {
    pub ephemeral_public: [u8; 32],
    pub one_time_address: Pubkey,
    pub view_tag: u8,
    pub mode: StealthMode,
    shared_secret: Zeroizing<[u8; 32]>,
}

impl StealthDerivation {
    pub fn kem_ciphertext(&self) -> Option<&KemCiphertext> {
        match &self.mode {
            StealthMode::Classical => None,
            StealthMode::Hybrid(ct) => Some(ct),
        }
    }

    pub fn is_hybrid(&self) -> bool {
        matches!(self.mode, StealthMode::Hybrid(_))
    }

    /// Encrypt a memo only the recipient can read.
    pub fn encrypt_memo(&self, memo: &str) -> Result<Vec<u8>, StealthError> {
        encrypt_memo(&self.shared_secret, &self.one_time_address, memo)
    }
}

impl fmt::Debug for StealthDerivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StealthDerivation")
            .field("one_time_address", &self.one_time_address)
            .field("view_tag", &self.view_tag)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers (also used by the scanner)
// ---------------------------------------------------------------------------

/// Fuse the ECDH secret with the KEM secret, if there is one.
pub(crate) fn combine_secrets(
    ecdh: &[u8; 32],
    kem_secret: Option<&[u8; 32]>,
) -> Result<Zeroizing<[u8; 32]>, StealthError> {
    match kem_secret {
        None => Ok(Zeroizing::new(*ecdh)),
        Some(kem_ss) => {
            let mut ikm = Zeroizing::new([0u8; 64]);
            ikm[..32].copy_from_slice(ecdh);
            ikm[32..].copy_from_slice(kem_ss);
            let okm = hkdf_sha256(&[], &ikm[..], HYBRID_KDF_INFO)
                .map_err(|_| StealthError::KeyDerivation)?;
            Ok(Zeroizing::new(okm))
        }
    }
}

/// `(h, view_tag)` from the combined secret.
pub(crate) fn stealth_scalar(secret: &[u8; 32]) -> (Scalar, u8) {
    let mut digest = sha256_with_domain(STEALTH_HASH_DOMAIN, &[secret]);
    let view_tag = digest[0];
    let h = scalar_from_hash(&digest);
    digest.zeroize();
    (h, view_tag)
}

fn memo_key(secret: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(domain_separated_hash(MEMO_KEY_CONTEXT, secret))
}

pub(crate) fn encrypt_memo(
    secret: &[u8; 32],
    one_time_address: &Pubkey,
    memo: &str,
) -> Result<Vec<u8>, StealthError> {
    if memo.len() > MAX_MEMO_LENGTH {
        return Err(StealthError::MemoTooLong(memo.len()));
    }
    let key = memo_key(secret);
    Ok(encryption::encrypt(&key, memo.as_bytes(), one_time_address.as_bytes())?)
}

/// `None` on any failure: wrong key, tampering, or non-UTF-8 plaintext.
pub(crate) fn decrypt_memo(
    secret: &[u8; 32],
    one_time_address: &Pubkey,
    ciphertext: &[u8],
) -> Option<String> {
    let key = memo_key(secret);
    let plain = encryption::decrypt(&key, ciphertext, one_time_address.as_bytes()).ok()?;
    String::from_utf8(plain).ok()
}

// ---------------------------------------------------------------------------
// Derivation entry points
// ---------------------------------------------------------------------------

/// Classical DKSAP derivation. Works on hybrid meta-addresses too, by
/// ignoring the KEM key.
pub fn derive_classical(meta: &MetaAddress) -> Result<StealthDerivation, StealthError> {
    derive_inner(meta, false)
}

/// Hybrid derivation. Fails with [`StealthError::NotHybrid`] if the
/// meta-address carries no KEM key.
pub fn derive_hybrid(meta: &MetaAddress) -> Result<StealthDerivation, StealthError> {
    if !meta.is_hybrid() {
        return Err(StealthError::NotHybrid);
    }
    derive_inner(meta, true)
}

/// Pick the strongest mode the meta-address supports.
pub fn derive_auto(meta: &MetaAddress) -> Result<StealthDerivation, StealthError> {
    if meta.is_hybrid() {
        derive_hybrid(meta)
    } else {
        derive_classical(meta)
    }
}

fn derive_inner(meta: &MetaAddress, hybrid: bool) -> Result<StealthDerivation, StealthError> {
    let spend_point = meta.spend_point()?;
    let view_point = meta.view_point()?;

    let r = random_scalar();
    let ephemeral_public = encode_point(&mul_base(&r));
    let mut ecdh = encode_point(&(r * view_point));

    let (mode, secret) = if hybrid {
        let kem_pk = meta.kem_public_key().ok_or(StealthError::NotHybrid)?;
        let (ct, kem_ss) = kem::encapsulate(kem_pk)?;
        let secret = combine_secrets(&ecdh, Some(&*kem_ss))?;
        (StealthMode::Hybrid(ct), secret)
    } else {
        (StealthMode::Classical, combine_secrets(&ecdh, None)?)
    };
    ecdh.zeroize();

    let (h, view_tag) = stealth_scalar(&secret);
    let one_time = spend_point + mul_base(&h);
    let one_time_address = Pubkey::new(encode_point(&one_time));

    trace!(address = %one_time_address, hybrid, "derived stealth address");

    Ok(StealthDerivation {
        ephemeral_public,
        one_time_address,
        view_tag,
        mode,
        shared_secret: secret,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::StealthKeyPair;

    #[test]
    fn one_time_addresses_are_unlinkable() {
        let meta = StealthKeyPair::generate().meta_address();
        let a = derive_classical(&meta).unwrap();
        let b = derive_classical(&meta).unwrap();
        assert_ne!(a.one_time_address, b.one_time_address);
        assert_ne!(a.ephemeral_public, b.ephemeral_public);
    }

    #[test]
    fn auto_dispatches_on_meta_address_kind() {
        let classical = StealthKeyPair::generate().meta_address();
        let hybrid = StealthKeyPair::generate_hybrid().meta_address();
        assert_eq!(derive_auto(&classical).unwrap().mode, StealthMode::Classical);
        let d = derive_auto(&hybrid).unwrap();
        assert!(d.is_hybrid());
        assert_eq!(d.kem_ciphertext().map(KemCiphertext::len), Some(1088));
    }

    #[test]
    fn hybrid_on_classical_address_fails() {
        let classical = StealthKeyPair::generate().meta_address();
        assert!(matches!(
            derive_hybrid(&classical),
            Err(StealthError::NotHybrid)
        ));
    }

    #[test]
    fn view_tag_is_first_digest_byte() {
        let secret = [3u8; 32];
        let digest = sha256_with_domain(STEALTH_HASH_DOMAIN, &[&secret]);
        let (h, tag) = stealth_scalar(&secret);
        assert_eq!(tag, digest[0]);
        assert_eq!(h, scalar_from_hash(&digest));
    }

    #[test]
    fn hybrid_secret_differs_from_classical() {
        let ecdh = [1u8; 32];
        let kem_ss = [2u8; 32];
        assert_ne!(
            *combine_secrets(&ecdh, None).unwrap(),
            *combine_secrets(&ecdh, Some(&kem_ss)).unwrap()
        );
    }

    #[test]
    fn memo_roundtrip_and_binding() {
        let secret = [9u8; 32];
        let addr = Pubkey::new([4; 32]);
        let ct = encrypt_memo(&secret, &addr, "lunch").unwrap();
        assert_eq!(decrypt_memo(&secret, &addr, &ct).as_deref(), Some("lunch"));
        assert_eq!(decrypt_memo(&[8u8; 32], &addr, &ct), None);
        assert_eq!(decrypt_memo(&secret, &Pubkey::new([5; 32]), &ct), None);
    }

    #[test]
    fn oversized_memo_rejected() {
        let memo = "x".repeat(MAX_MEMO_LENGTH + 1);
        assert!(matches!(
            encrypt_memo(&[0u8; 32], &Pubkey::default(), &memo),
            Err(StealthError::MemoTooLong(_))
        ));
    }
}
