//! Published stealth meta-addresses.
//!
//! Binary layout is `spend (32) ‖ view (32) [‖ kem_pk (1184)]` and the
//! string form is plain base58 of those bytes. There is no version prefix:
//! the decoded length alone tells classical (64) from hybrid (1248).

use std::fmt;
use std::str::FromStr;

use curve25519_dalek::edwards::EdwardsPoint;

use super::StealthError;
use crate::config::{
    CLASSICAL_META_ADDRESS_LENGTH, HYBRID_META_ADDRESS_LENGTH, KEM_PUBLIC_KEY_LENGTH, POINT_LENGTH,
};
use crate::crypto::curve::{decode_point, encode_point};

/// A recipient's public stealth identity.
#[derive(Clone, PartialEq, Eq)]
pub struct MetaAddress {
    spend: [u8; 32],
    view: [u8; 32],
    kem_public_key: Option<Vec<u8>>,
}

impl MetaAddress {
    pub(crate) fn from_points(
        spend: &EdwardsPoint,
        view: &EdwardsPoint,
        kem_public_key: Option<Vec<u8>>,
    ) -> Self {
        Self {
            spend: encode_point(spend),
            view: encode_point(view),
            kem_public_key,
        }
    }

    /// Parse the binary layout. Length is checked first, then both points
    /// must decode to valid, non-small-order curve points.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StealthError> {
        let kem_public_key = match bytes.len() {
            CLASSICAL_META_ADDRESS_LENGTH => None,
            HYBRID_META_ADDRESS_LENGTH => Some(bytes[CLASSICAL_META_ADDRESS_LENGTH..].to_vec()),
            other => return Err(StealthError::InvalidMetaAddressLength(other)),
        };
        let spend = &bytes[..POINT_LENGTH];
        let view = &bytes[POINT_LENGTH..CLASSICAL_META_ADDRESS_LENGTH];
        decode_point(spend)?;
        decode_point(view)?;

        let mut out = Self {
            spend: [0u8; 32],
            view: [0u8; 32],
            kem_public_key,
        };
        out.spend.copy_from_slice(spend);
        out.view.copy_from_slice(view);
        Ok(out)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let kem_len = self.kem_public_key.as_ref().map_or(0, Vec::len);
        let mut out = Vec::with_capacity(CLASSICAL_META_ADDRESS_LENGTH + kem_len);
        out.extend_from_slice(&self.spend);
        out.extend_from_slice(&self.view);
        if let Some(kem) = &self.kem_public_key {
            out.extend_from_slice(kem);
        }
        out
    }

    /// base58 string for QR codes and contact cards.
    pub fn encode(&self) -> String {
        bs58::encode(self.to_bytes()).into_string()
    }

    pub fn is_hybrid(&self) -> bool {
        self.kem_public_key.is_some()
    }

    pub fn spend_point(&self) -> Result<EdwardsPoint, StealthError> {
        Ok(decode_point(&self.spend)?)
    }

    pub fn view_point(&self) -> Result<EdwardsPoint, StealthError> {
        Ok(decode_point(&self.view)?)
    }

    pub fn kem_public_key(&self) -> Option<&[u8]> {
        self.kem_public_key.as_deref()
    }
}

impl FromStr for MetaAddress {
    type Err = StealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|_| StealthError::InvalidEncoding)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for MetaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for MetaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetaAddress(spend={}, view={}, kem={})",
            &hex::encode(self.spend)[..16],
            &hex::encode(self.view)[..16],
            if self.is_hybrid() { KEM_PUBLIC_KEY_LENGTH } else { 0 }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::StealthKeyPair;

    #[test]
    fn classical_string_roundtrip() {
        let meta = StealthKeyPair::generate().meta_address();
        let parsed: MetaAddress = meta.encode().parse().unwrap();
        assert_eq!(parsed, meta);
        assert!(!parsed.is_hybrid());
    }

    #[test]
    fn hybrid_string_roundtrip() {
        let meta = StealthKeyPair::generate_hybrid().meta_address();
        let parsed: MetaAddress = meta.to_string().parse().unwrap();
        assert!(parsed.is_hybrid());
        assert_eq!(parsed.kem_public_key().map(<[u8]>::len), Some(1184));
        assert_eq!(parsed, meta);
    }

    #[test]
    fn wrong_lengths_rejected() {
        for len in [0usize, 32, 63, 65, 1247, 1249] {
            let encoded = bs58::encode(vec![1u8; len]).into_string();
            assert!(
                matches!(
                    encoded.parse::<MetaAddress>(),
                    Err(StealthError::InvalidMetaAddressLength(l)) if l == len
                ),
                "length {len} should be rejected"
            );
        }
    }

    #[test]
    fn bad_charset_rejected() {
        // '0', 'O', 'I' and 'l' are not in the base58 alphabet.
        assert!(matches!(
            "0OIl0OIl".parse::<MetaAddress>(),
            Err(StealthError::InvalidEncoding)
        ));
    }

    #[test]
    fn invalid_points_rejected() {
        let mut bytes = StealthKeyPair::generate().meta_address().to_bytes();
        // y = 1 is the identity.
        bytes[..32].copy_from_slice(&{
            let mut id = [0u8; 32];
            id[0] = 1;
            id
        });
        assert!(matches!(
            MetaAddress::from_bytes(&bytes),
            Err(StealthError::Curve(_))
        ));
    }
}
