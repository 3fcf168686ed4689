//! # Cryptographic Primitives
//!
//! Everything here is a thin, typed wrapper around audited crates:
//!
//! - **Ed25519** (`curve25519-dalek`, `ed25519-dalek`): stealth scalar and
//!   point arithmetic, wallet signatures.
//! - **ML-KEM-768** (`pqcrypto-kyber`): the post-quantum half of hybrid
//!   stealth derivation.
//! - **AES-256-GCM**: memo encryption.
//! - **SHA-256 / BLAKE3 / HKDF**: hashing and key derivation.
//!
//! Nothing in this module knows what a payment is. The stealth engine in
//! `crate::stealth` composes these pieces.

pub mod curve;
pub mod encryption;
pub mod hash;
pub mod kem;
pub mod keys;

pub use curve::CurveError;
pub use encryption::EncryptionError;
pub use kem::{KemCiphertext, KemError, KemKeyPair};
pub use keys::{KeyError, LedgerKeypair};
