//! # Stealth Key Pairs
//!
//! A recipient holds two Ed25519 scalars:
//!
//! - **spend** `m`, with public point `M = m·G`. Needed to move funds.
//! - **view** `v`, with public point `V = v·G`. Enough to *detect*
//!   payments, so it can be handed to a watch-only device.
//!
//! Hybrid key pairs add an ML-KEM-768 key pair on top. The published
//! meta-address is `M ‖ V` or `M ‖ V ‖ kem_pk`.

use std::fmt;

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::meta_address::MetaAddress;
use super::StealthError;
use crate::config::{MIN_SEED_LENGTH, SEED_DERIVATION_DOMAIN};
use crate::crypto::curve::{decode_point, encode_point, mul_base, random_scalar, scalar_from_hash};
use crate::crypto::hash::sha256_with_domain;
use crate::crypto::KemKeyPair;

// ---------------------------------------------------------------------------
// SecretScalar
// ---------------------------------------------------------------------------

/// A scalar that is wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretScalar {
    scalar: Scalar,
}

impl SecretScalar {
    pub fn new(scalar: Scalar) -> Self {
        Self { scalar }
    }

    /// Reduce 32 bytes mod ℓ. Secret keys from storage may not be canonical.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            scalar: Scalar::from_bytes_mod_order(bytes),
        }
    }

    pub fn scalar(&self) -> &Scalar {
        &self.scalar
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.scalar.to_bytes()
    }

    pub fn public_point(&self) -> EdwardsPoint {
        mul_base(&self.scalar)
    }
}

impl fmt::Debug for SecretScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretScalar(..)")
    }
}

// ---------------------------------------------------------------------------
// StealthKeyPair
// ---------------------------------------------------------------------------

/// The recipient's full key set.
#[derive(Clone)]
pub struct StealthKeyPair {
    spend: SecretScalar,
    spend_point: EdwardsPoint,
    view: SecretScalar,
    view_point: EdwardsPoint,
    kem: Option<KemKeyPair>,
}

impl StealthKeyPair {
    /// Fresh classical key pair.
    pub fn generate() -> Self {
        Self::from_scalars(random_scalar(), random_scalar(), None)
    }

    /// Fresh hybrid key pair with an ML-KEM-768 component.
    pub fn generate_hybrid() -> Self {
        Self::from_scalars(random_scalar(), random_scalar(), Some(KemKeyPair::generate()))
    }

    /// Derive spend and view scalars from a wallet seed.
    ///
    /// The KEM half cannot be derived from a seed with the KEM library we
    /// use, so a hybrid restore passes the stored KEM key pair back in.
    pub fn from_seed(seed: &[u8], kem: Option<KemKeyPair>) -> Result<Self, StealthError> {
        if seed.len() < MIN_SEED_LENGTH {
            return Err(StealthError::SeedTooShort(seed.len()));
        }
        let mut spend_hash = sha256_with_domain(SEED_DERIVATION_DOMAIN, &[b"spend", seed]);
        let mut view_hash = sha256_with_domain(SEED_DERIVATION_DOMAIN, &[b"view", seed]);
        let keys = Self::from_scalars(
            scalar_from_hash(&spend_hash),
            scalar_from_hash(&view_hash),
            kem,
        );
        spend_hash.zeroize();
        view_hash.zeroize();
        Ok(keys)
    }

    /// Rebuild from stored secrets. Public points are recomputed.
    pub fn from_secrets(
        spend_secret: [u8; 32],
        view_secret: [u8; 32],
        kem: Option<KemKeyPair>,
    ) -> Self {
        let spend = SecretScalar::from_bytes(spend_secret);
        let view = SecretScalar::from_bytes(view_secret);
        Self::from_parts_unchecked(spend, view, kem)
    }

    /// Rebuild from stored secrets *and* public points, checking that each
    /// point is its scalar times G.
    pub fn from_parts(
        spend_secret: [u8; 32],
        view_secret: [u8; 32],
        spend_public: &[u8],
        view_public: &[u8],
        kem: Option<KemKeyPair>,
    ) -> Result<Self, StealthError> {
        let keys = Self::from_secrets(spend_secret, view_secret, kem);
        let claimed_spend = decode_point(spend_public)?;
        let claimed_view = decode_point(view_public)?;
        if claimed_spend != keys.spend_point || claimed_view != keys.view_point {
            return Err(StealthError::KeyMismatch);
        }
        Ok(keys)
    }

    fn from_scalars(spend: Scalar, view: Scalar, kem: Option<KemKeyPair>) -> Self {
        Self::from_parts_unchecked(SecretScalar::new(spend), SecretScalar::new(view), kem)
    }

    fn from_parts_unchecked(spend: SecretScalar, view: SecretScalar, kem: Option<KemKeyPair>) -> Self {
        let spend_point = spend.public_point();
        let view_point = view.public_point();
        Self {
            spend,
            spend_point,
            view,
            view_point,
            kem,
        }
    }

    /// The address to publish.
    pub fn meta_address(&self) -> MetaAddress {
        MetaAddress::from_points(
            &self.spend_point,
            &self.view_point,
            self.kem.as_ref().map(|k| k.public_key().to_vec()),
        )
    }

    /// Detection-only key: view scalar, spend point, KEM key if any.
    pub fn viewing_key(&self) -> ViewingKey {
        ViewingKey {
            view: self.view.clone(),
            spend_point: self.spend_point,
            kem: self.kem.clone(),
        }
    }

    pub fn is_hybrid(&self) -> bool {
        self.kem.is_some()
    }

    pub fn spend_public(&self) -> [u8; 32] {
        encode_point(&self.spend_point)
    }

    pub fn view_public(&self) -> [u8; 32] {
        encode_point(&self.view_point)
    }

    pub fn kem(&self) -> Option<&KemKeyPair> {
        self.kem.as_ref()
    }

    /// Raw `(spend, view)` secrets for handing to secure storage.
    pub fn export_secrets(&self) -> ([u8; 32], [u8; 32]) {
        (self.spend.to_bytes(), self.view.to_bytes())
    }

    pub(crate) fn spend_scalar(&self) -> &Scalar {
        self.spend.scalar()
    }

    pub(crate) fn view_scalar(&self) -> &Scalar {
        self.view.scalar()
    }

    pub(crate) fn spend_point(&self) -> &EdwardsPoint {
        &self.spend_point
    }

    pub(crate) fn view_point(&self) -> &EdwardsPoint {
        &self.view_point
    }
}

impl fmt::Debug for StealthKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StealthKeyPair")
            .field("spend_public", &hex::encode(self.spend_public()))
            .field("view_public", &hex::encode(self.view_public()))
            .field("hybrid", &self.is_hybrid())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ViewingKey
// ---------------------------------------------------------------------------

/// Can tell whether a payment belongs to the owner, cannot spend it.
#[derive(Clone)]
pub struct ViewingKey {
    view: SecretScalar,
    spend_point: EdwardsPoint,
    kem: Option<KemKeyPair>,
}

impl ViewingKey {
    pub(crate) fn view_scalar(&self) -> &Scalar {
        self.view.scalar()
    }

    pub(crate) fn spend_point(&self) -> &EdwardsPoint {
        &self.spend_point
    }

    pub(crate) fn kem(&self) -> Option<&KemKeyPair> {
        self.kem.as_ref()
    }
}

impl fmt::Debug for ViewingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewingKey")
            .field("spend_public", &hex::encode(encode_point(&self.spend_point)))
            .finish_non_exhaustive()
    }
}
