//! # Recipient-side Detection
//!
//! For each announced payment `(R, P, view_tag [, ct])` the recipient
//! recomputes the shared secret with its view scalar, checks the one-byte
//! view tag, and only on a tag hit does the point arithmetic to compare
//! `M + h·G` against `P`.
//!
//! The tag rejects roughly 255 of every 256 foreign payments after one
//! hash. It is a filter only: ownership is decided by the constant-time
//! point comparison.
//!
//! A candidate that fails to decode, decapsulate, or match is simply not
//! ours. Scanning never reports *why*.

use curve25519_dalek::scalar::Scalar;
use rayon::prelude::*;
use subtle::ConstantTimeEq;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use super::derive::{combine_secrets, decrypt_memo, stealth_scalar};
use super::keys::{SecretScalar, StealthKeyPair, ViewingKey};
use super::signer::StealthSigner;
use super::StealthError;
use crate::config::POINT_LENGTH;
use crate::crypto::curve::{decode_point, encode_point, mul_base};
use crate::crypto::kem::{KemCiphertext, KemKeyPair};
use crate::ledger::Pubkey;

/// The public parts of an announced payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCandidate {
    pub ephemeral_public: [u8; 32],
    pub one_time_address: Pubkey,
    pub view_tag: u8,
    pub kem_ciphertext: Option<KemCiphertext>,
}

impl ScanCandidate {
    /// Build from raw bytes, checking lengths before any crypto runs.
    pub fn from_parts(
        ephemeral_public: &[u8],
        one_time_address: Pubkey,
        view_tag: u8,
        kem_ciphertext: Option<&[u8]>,
    ) -> Result<Self, StealthError> {
        let ephemeral_public: [u8; 32] =
            ephemeral_public
                .try_into()
                .map_err(|_| StealthError::InvalidEphemeralKey(ephemeral_public.len()))?;
        let kem_ciphertext = kem_ciphertext.map(KemCiphertext::from_bytes).transpose()?;
        Ok(Self {
            ephemeral_public,
            one_time_address,
            view_tag,
            kem_ciphertext,
        })
    }
}

/// A payment that belongs to us, with the key to spend it.
pub struct DetectedPayment {
    one_time_address: Pubkey,
    view_tag: u8,
    spend_key: SecretScalar,
    shared_secret: Zeroizing<[u8; 32]>,
}

impl DetectedPayment {
    pub fn one_time_address(&self) -> &Pubkey {
        &self.one_time_address
    }

    pub fn view_tag(&self) -> u8 {
        self.view_tag
    }

    /// The one-time secret `s = m + h`. Zeroized when the payment drops.
    pub fn spend_key(&self) -> &SecretScalar {
        &self.spend_key
    }

    /// A signer for transactions out of the one-time address.
    pub fn signer(&self) -> Result<StealthSigner, StealthError> {
        StealthSigner::from_scalar(self.spend_key.scalar())
    }

    /// Decrypt the memo attached to this payment, if it decrypts.
    pub fn decrypt_memo(&self, ciphertext: &[u8]) -> Option<String> {
        decrypt_memo(&self.shared_secret, &self.one_time_address, ciphertext)
    }
}

impl std::fmt::Debug for DetectedPayment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectedPayment")
            .field("one_time_address", &self.one_time_address)
            .field("view_tag", &self.view_tag)
            .finish_non_exhaustive()
    }
}

/// Shared secret and `h` for a candidate, if the tag matches and the
/// address is `M + h·G`.
fn match_candidate(
    view_scalar: &Scalar,
    spend_point: &curve25519_dalek::edwards::EdwardsPoint,
    kem: Option<&KemKeyPair>,
    candidate: &ScanCandidate,
) -> Option<(Scalar, Zeroizing<[u8; 32]>)> {
    let ephemeral = decode_point(&candidate.ephemeral_public).ok()?;
    let ecdh = Zeroizing::new(encode_point(&(view_scalar * ephemeral)));

    let secret = match (&candidate.kem_ciphertext, kem) {
        (Some(ct), Some(kem)) => {
            ct.validate().ok()?;
            let kem_ss = kem.decapsulate(ct).ok()?;
            combine_secrets(&ecdh, Some(&*kem_ss)).ok()?
        }
        // A hybrid payment to a classical-only key can't be ours.
        (Some(_), None) => return None,
        (None, _) => combine_secrets(&ecdh, None).ok()?,
    };

    let (h, view_tag) = stealth_scalar(&secret);
    if view_tag != candidate.view_tag {
        trace!("view tag mismatch");
        return None;
    }

    let expected: [u8; POINT_LENGTH] = encode_point(&(spend_point + mul_base(&h)));
    if !bool::from(expected[..].ct_eq(&candidate.one_time_address.as_bytes()[..])) {
        debug!("view tag collision, address mismatch");
        return None;
    }
    Some((h, secret))
}

/// Check one candidate against the full key pair. `None` if not ours.
pub fn scan(keys: &StealthKeyPair, candidate: &ScanCandidate) -> Option<DetectedPayment> {
    let (h, shared_secret) = match_candidate(
        keys.view_scalar(),
        keys.spend_point(),
        keys.kem(),
        candidate,
    )?;

    let s = SecretScalar::new(keys.spend_scalar() + h);
    // s·G must land on P. Guaranteed by the algebra, checked anyway.
    let recomputed = encode_point(&s.public_point());
    if !bool::from(recomputed[..].ct_eq(&candidate.one_time_address.as_bytes()[..])) {
        return None;
    }

    Some(DetectedPayment {
        one_time_address: candidate.one_time_address,
        view_tag: candidate.view_tag,
        spend_key: s,
        shared_secret,
    })
}

/// Scan many candidates in parallel. Matches come back in input order.
pub fn scan_batch(keys: &StealthKeyPair, candidates: &[ScanCandidate]) -> Vec<DetectedPayment> {
    let found: Vec<DetectedPayment> = candidates
        .par_iter()
        .filter_map(|c| scan(keys, c))
        .collect();
    debug!(
        scanned = candidates.len(),
        matched = found.len(),
        "batch scan complete"
    );
    found
}

impl ViewingKey {
    /// Whether the candidate belongs to the owner of this viewing key.
    pub fn owns(&self, candidate: &ScanCandidate) -> bool {
        match_candidate(self.view_scalar(), self.spend_point(), self.kem(), candidate).is_some()
    }

    /// Decrypt a memo for a payment this key owns.
    pub fn decrypt_memo(&self, candidate: &ScanCandidate, ciphertext: &[u8]) -> Option<String> {
        let (_, secret) =
            match_candidate(self.view_scalar(), self.spend_point(), self.kem(), candidate)?;
        decrypt_memo(&secret, &candidate.one_time_address, ciphertext)
    }
}
