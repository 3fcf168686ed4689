//! # Stealth Address Engine
//!
//! Dual-key stealth addresses over Ed25519, with an optional ML-KEM-768
//! layer that keeps one-time addresses unlinkable even against an
//! adversary who can later break discrete logs.
//!
//! A recipient publishes a [`MetaAddress`]. A sender runs [`derive_auto`]
//! against it to get a fresh one-time address plus the ephemeral key (and
//! KEM ciphertext) to announce. The recipient feeds announcements to
//! [`scan`] or [`scan_batch`]; a hit yields a [`DetectedPayment`] whose
//! [`StealthSigner`] can move the funds.
//!
//! A [`ViewingKey`] detects payments and reads memos but cannot spend.

pub mod derive;
pub mod keys;
pub mod meta_address;
pub mod scan;
pub mod signer;

use thiserror::Error;

use crate::crypto::{CurveError, EncryptionError, KemError};

pub use derive::{derive_auto, derive_classical, derive_hybrid, StealthDerivation, StealthMode};
pub use keys::{SecretScalar, StealthKeyPair, ViewingKey};
pub use meta_address::MetaAddress;
pub use scan::{scan, scan_batch, DetectedPayment, ScanCandidate};
pub use signer::StealthSigner;

/// Stealth engine failures.
#[derive(Debug, Error)]
pub enum StealthError {
    #[error("invalid meta-address length: expected 64 or 1248 bytes, got {0}")]
    InvalidMetaAddressLength(usize),

    #[error("meta-address is not valid base58")]
    InvalidEncoding,

    #[error("invalid ephemeral public key length: expected 32 bytes, got {0}")]
    InvalidEphemeralKey(usize),

    #[error("curve error: {0}")]
    Curve(#[from] CurveError),

    #[error("KEM error: {0}")]
    Kem(#[from] KemError),

    #[error("meta-address has no KEM public key")]
    NotHybrid,

    #[error("secret keys do not match the public keys")]
    KeyMismatch,

    #[error("seed too short: need at least 32 bytes, got {0}")]
    SeedTooShort(usize),

    #[error("memo too long: {0} bytes (max 256)")]
    MemoTooLong(usize),

    #[error("memo encryption failed: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("scalar is not usable as a signing key")]
    InvalidSigningKey,

    #[error("hybrid key derivation failed")]
    KeyDerivation,
}
