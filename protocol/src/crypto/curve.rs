//! # Scalar & Point Arithmetic
//!
//! The smallest possible surface over `curve25519-dalek` that the stealth
//! engine needs: random scalars, base-point multiplication, and strict
//! point decoding.
//!
//! "Strict" means a decoded point must be a valid curve point, must not be
//! the identity, and must not have small order. Small-order points would
//! let a malicious sender force a predictable shared secret.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::{POINT_LENGTH, SCALAR_LENGTH};

/// Errors from decoding curve elements.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CurveError {
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("bytes do not decode to a curve point")]
    InvalidPoint,

    #[error("point has small order")]
    SmallOrderPoint,

    #[error("scalar encoding is not canonical")]
    NonCanonicalScalar,
}

/// A uniformly random scalar from the OS RNG.
///
/// Reduces 64 random bytes so the bias is negligible.
pub fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    OsRng.fill_bytes(&mut wide);
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

/// Reduce 32 arbitrary bytes mod ℓ.
pub fn scalar_from_hash(bytes: &[u8; 32]) -> Scalar {
    Scalar::from_bytes_mod_order(*bytes)
}

/// Decode a canonical scalar. Rejects encodings ≥ ℓ.
pub fn scalar_from_canonical(bytes: &[u8]) -> Result<Scalar, CurveError> {
    let arr: [u8; SCALAR_LENGTH] = bytes.try_into().map_err(|_| CurveError::InvalidLength {
        expected: SCALAR_LENGTH,
        got: bytes.len(),
    })?;
    Option::from(Scalar::from_canonical_bytes(arr)).ok_or(CurveError::NonCanonicalScalar)
}

/// `s·G`.
pub fn mul_base(scalar: &Scalar) -> EdwardsPoint {
    EdwardsPoint::mul_base(scalar)
}

/// Decode a compressed point, rejecting identity and small-order points.
pub fn decode_point(bytes: &[u8]) -> Result<EdwardsPoint, CurveError> {
    if bytes.len() != POINT_LENGTH {
        return Err(CurveError::InvalidLength {
            expected: POINT_LENGTH,
            got: bytes.len(),
        });
    }
    let compressed = CompressedEdwardsY::from_slice(bytes).map_err(|_| CurveError::InvalidPoint)?;
    let point = compressed.decompress().ok_or(CurveError::InvalidPoint)?;
    if point.is_identity() || point.is_small_order() {
        return Err(CurveError::SmallOrderPoint);
    }
    Ok(point)
}

/// Compressed 32-byte encoding.
pub fn encode_point(point: &EdwardsPoint) -> [u8; POINT_LENGTH] {
    point.compress().to_bytes()
}
