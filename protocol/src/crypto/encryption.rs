//! # Symmetric Encryption (AES-256-GCM)
//!
//! Used for payment memos. The key comes out of the stealth shared secret,
//! so only the sender and the recipient can read what the sender wrote.
//! Relaying peers carry the ciphertext without learning anything.
//!
//! Wire format is `nonce (12) ‖ ciphertext ‖ tag (16)`. The nonce is random
//! per message; memo keys are single-use anyway, so nonce reuse would need
//! two memos under the same one-time address.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use thiserror::Error;

/// AES-256 key length.
pub const AES_KEY_LENGTH: usize = 32;

/// GCM nonce length. 96 bits, the only size anyone should use.
pub const AES_NONCE_LENGTH: usize = 12;

/// GCM authentication tag length.
pub const AES_TAG_LENGTH: usize = 16;

/// Encryption failures. Deliberately coarse: telling an attacker *why*
/// decryption failed is a padding-oracle waiting to happen.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed: wrong key or tampered data")]
    DecryptFailed,

    #[error("ciphertext too short to contain nonce and tag")]
    CiphertextTooShort,
}

/// Encrypt `plaintext`, authenticating `aad` alongside it.
///
/// Returns `nonce ‖ ciphertext ‖ tag`.
pub fn encrypt(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`encrypt`]. The `aad` must match.
pub fn decrypt(
    key: &[u8; AES_KEY_LENGTH],
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn roundtrip_with_aad() {
        let key = test_key();
        let sealed = encrypt(&key, b"coffee, thanks", b"addr").unwrap();
        assert_eq!(decrypt(&key, &sealed, b"addr").unwrap(), b"coffee, thanks");
    }

    #[test]
    fn empty_plaintext_is_nonce_plus_tag() {
        let key = test_key();
        let sealed = encrypt(&key, b"", b"").unwrap();
        assert_eq!(sealed.len(), AES_NONCE_LENGTH + AES_TAG_LENGTH);
        assert!(decrypt(&key, &sealed, b"").unwrap().is_empty());
    }

    #[test]
    fn wrong_key_fails() {
        let key = test_key();
        let sealed = encrypt(&key, b"secret", b"").unwrap();
        let mut wrong = key;
        wrong[0] ^= 0xFF;
        assert_eq!(
            decrypt(&wrong, &sealed, b""),
            Err(EncryptionError::DecryptFailed)
        );
    }

    #[test]
    fn wrong_aad_fails() {
        let key = test_key();
        let sealed = encrypt(&key, b"secret", b"address-one").unwrap();
        assert!(decrypt(&key, &sealed, b"address-two").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key();
        let mut sealed = encrypt(&key, b"secret", b"").unwrap();
        sealed[AES_NONCE_LENGTH] ^= 0x01;
        assert!(decrypt(&key, &sealed, b"").is_err());
    }

    #[test]
    fn short_input_rejected() {
        assert_eq!(
            decrypt(&test_key(), &[0u8; 20], b""),
            Err(EncryptionError::CiphertextTooShort)
        );
    }

    #[test]
    fn nonces_are_fresh() {
        let key = test_key();
        let a = encrypt(&key, b"m", b"").unwrap();
        let b = encrypt(&key, b"m", b"").unwrap();
        assert_ne!(&a[..AES_NONCE_LENGTH], &b[..AES_NONCE_LENGTH]);
    }
}
