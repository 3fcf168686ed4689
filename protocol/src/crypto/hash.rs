//! # Hashing Utilities
//!
//! Two hash families, each with a job:
//!
//! - **SHA-256 / SHA-512**: the stealth scalar derivation and the raw-scalar
//!   signing nonce prefix. Wallets on other platforms derive the same
//!   addresses, so these have to be the boring, universally available ones.
//! - **BLAKE3**: local key derivation where nobody else needs to agree with
//!   us (memo keys, seed expansion). Its `derive_key` mode gives domain
//!   separation for free.
//!
//! Plus HKDF-SHA256 for fusing the classical and post-quantum secrets.

use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};

/// SHA-256 over a single buffer.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over `domain ‖ parts[0] ‖ parts[1] ‖ ...`.
///
/// No length prefixes: callers only pass fixed-size parts, so concatenation
/// is unambiguous.
pub fn sha256_with_domain(domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// SHA-512 over `domain ‖ data`.
pub fn sha512_with_domain(domain: &[u8], data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// BLAKE3 of the input.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 in key-derivation mode.
///
/// The context string must be hardcoded, globally unique, and
/// application-specific. Two different contexts over the same key material
/// produce unrelated outputs.
pub fn domain_separated_hash(context: &str, key_material: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, key_material)
}

/// HKDF-SHA256 extract-then-expand into an `N`-byte key.
///
/// `salt` may be empty, in which case HKDF uses a zero-filled salt. Fails
/// only when `N` exceeds HKDF-SHA256's 8160-byte output limit.
pub fn hkdf_sha256<const N: usize>(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
) -> Result<[u8; N], hkdf::InvalidLength> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; N];
    hk.expand(info, &mut okm)?;
    Ok(okm)
}
