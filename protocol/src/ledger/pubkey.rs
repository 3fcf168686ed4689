//! Account addresses, blockhashes and signatures.
//!
//! All three display as base58, which is what every ledger explorer and
//! wallet expects to see.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing a [`Pubkey`] or [`Hash`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParsePubkeyError {
    #[error("invalid base58 string")]
    InvalidBase58,

    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

fn decode_base58<const N: usize>(s: &str) -> Result<[u8; N], ParsePubkeyError> {
    let bytes = bs58::decode(s)
        .into_vec()
        .map_err(|_| ParsePubkeyError::InvalidBase58)?;
    let got = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ParsePubkeyError::InvalidLength { expected: N, got })
}

// ---------------------------------------------------------------------------
// Pubkey
// ---------------------------------------------------------------------------

/// A 32-byte account address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(slice: &[u8]) -> Result<Self, ParsePubkeyError> {
        let arr: [u8; 32] = slice
            .try_into()
            .map_err(|_| ParsePubkeyError::InvalidLength {
                expected: 32,
                got: slice.len(),
            })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl FromStr for Pubkey {
    type Err = ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base58::<32>(s).map(Self)
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({self})")
    }
}

impl From<[u8; 32]> for Pubkey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

// ---------------------------------------------------------------------------
// Well-known addresses
// ---------------------------------------------------------------------------

/// `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey([0u8; 32]);

/// `SysvarRecentB1ockHashes11111111111111111111`
pub const SYSVAR_RECENT_BLOCKHASHES_ID: Pubkey = Pubkey([
    6, 167, 213, 23, 25, 44, 86, 142, 224, 138, 132, 95, 115, 210, 151, 136, 207, 3, 92, 49, 69,
    178, 26, 179, 68, 216, 6, 46, 169, 64, 0, 0,
]);

/// `SysvarRent111111111111111111111111111111111`
pub const SYSVAR_RENT_ID: Pubkey = Pubkey([
    6, 167, 213, 23, 25, 44, 92, 81, 33, 140, 201, 76, 61, 74, 241, 127, 88, 218, 238, 8, 155,
    161, 253, 68, 227, 219, 217, 138, 0, 0, 0, 0,
]);

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

/// A 32-byte blockhash, or the durable nonce value standing in for one.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl FromStr for Hash {
    type Err = ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base58::<32>(s).map(Self)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A 64-byte Ed25519 signature. The first signature of a transaction is
/// its id on the ledger.
///
/// serde only derives for arrays up to 32 elements, so this goes through a
/// `Vec<u8>` on the way in and out.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Signature([u8; 64]);

impl Signature {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// The all-zero placeholder used for not-yet-signed slots.
    pub fn is_placeholder(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl TryFrom<Vec<u8>> for Signature {
    type Error = ParsePubkeyError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        let got = bytes.len();
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| ParsePubkeyError::InvalidLength { expected: 64, got })
    }
}

impl From<Signature> for Vec<u8> {
    fn from(sig: Signature) -> Self {
        sig.0.to_vec()
    }
}

impl FromStr for Signature {
    type Err = ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base58::<64>(s).map(Self)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.to_string();
        write!(f, "Signature({}…)", &s[..s.len().min(12)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_ids_display_correctly() {
        assert_eq!(
            SYSTEM_PROGRAM_ID.to_string(),
            "11111111111111111111111111111111"
        );
        assert_eq!(
            SYSVAR_RECENT_BLOCKHASHES_ID.to_string(),
            "SysvarRecentB1ockHashes11111111111111111111"
        );
        assert_eq!(
            SYSVAR_RENT_ID.to_string(),
            "SysvarRent111111111111111111111111111111111"
        );
    }

    #[test]
    fn pubkey_base58_roundtrip() {
        let key = Pubkey::new([7u8; 32]);
        let parsed: Pubkey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn pubkey_rejects_bad_input() {
        assert_eq!(
            "0OIl".parse::<Pubkey>(),
            Err(ParsePubkeyError::InvalidBase58)
        );
        let short = bs58::encode([1u8; 31]).into_string();
        assert_eq!(
            short.parse::<Pubkey>(),
            Err(ParsePubkeyError::InvalidLength {
                expected: 32,
                got: 31
            })
        );
    }

    #[test]
    fn signature_serde_through_bincode() {
        let sig = Signature::new([9u8; 64]);
        let bytes = bincode::serialize(&sig).unwrap();
        let back: Signature = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, sig);
        assert!(!sig.is_placeholder());
        assert!(Signature::default().is_placeholder());
    }
}
