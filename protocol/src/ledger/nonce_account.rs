//! Nonce account data layout.
//!
//! ```text
//! offset  size  field
//! 0       4     version (u32 LE, 1 = current)
//! 4       4     state   (u32 LE, 0 = uninitialized, 1 = initialized)
//! 8       32    authority
//! 40      32    durable nonce value
//! 72      8     lamports per signature (u64 LE)
//! ```

use serde::{Deserialize, Serialize};

use super::message::{read_array, read_slice};
use super::pubkey::{Hash, Pubkey};
use super::CodecError;
use crate::config::NONCE_ACCOUNT_LENGTH;

const NONCE_VERSION_CURRENT: u32 = 1;
const NONCE_STATE_INITIALIZED: u32 = 1;

/// An initialized nonce account as stored on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceAccountState {
    pub authority: Pubkey,
    pub nonce: Hash,
    pub lamports_per_signature: u64,
}

impl NonceAccountState {
    /// Parse raw account data. Uninitialized accounts are an error because
    /// there is no nonce to sign against yet.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != NONCE_ACCOUNT_LENGTH as usize {
            return Err(CodecError::InvalidNonceAccount("wrong data length"));
        }
        let mut offset = 0;
        let _version = u32::from_le_bytes(read_array(data, &mut offset)?);
        let state = u32::from_le_bytes(read_array(data, &mut offset)?);
        if state != NONCE_STATE_INITIALIZED {
            return Err(CodecError::InvalidNonceAccount("not initialized"));
        }
        let authority = Pubkey::new(read_array(data, &mut offset)?);
        let nonce = Hash::new(read_array(data, &mut offset)?);
        let fee = read_slice(data, &mut offset, 8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(fee);
        Ok(Self {
            authority,
            nonce,
            lamports_per_signature: u64::from_le_bytes(arr),
        })
    }

    /// Encode in the on-ledger layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_ACCOUNT_LENGTH as usize);
        out.extend_from_slice(&NONCE_VERSION_CURRENT.to_le_bytes());
        out.extend_from_slice(&NONCE_STATE_INITIALIZED.to_le_bytes());
        out.extend_from_slice(self.authority.as_bytes());
        out.extend_from_slice(self.nonce.as_bytes());
        out.extend_from_slice(&self.lamports_per_signature.to_le_bytes());
        out
    }
}
