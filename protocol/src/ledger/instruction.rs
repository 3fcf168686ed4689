//! Instructions and the handful of system-program builders we need.
//!
//! Instruction data for the system program is a little-endian `u32`
//! discriminant followed by the variant's fields, also little-endian.

use serde::{Deserialize, Serialize};

use super::pubkey::{Pubkey, SYSTEM_PROGRAM_ID, SYSVAR_RECENT_BLOCKHASHES_ID, SYSVAR_RENT_ID};
use super::CodecError;
use crate::config::NONCE_ACCOUNT_LENGTH;

/// One account reference inside an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    /// A writable account.
    pub fn new(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn new_readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// An uncompiled instruction: program, accounts, opaque data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// System program
// ---------------------------------------------------------------------------

const CREATE_ACCOUNT: u32 = 0;
const TRANSFER: u32 = 2;
const ADVANCE_NONCE_ACCOUNT: u32 = 4;
const INITIALIZE_NONCE_ACCOUNT: u32 = 6;

/// Decoded system-program instruction data. Only the variants this crate
/// builds are modelled; anything else comes back as `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemInstruction {
    CreateAccount {
        lamports: u64,
        space: u64,
        owner: Pubkey,
    },
    Transfer {
        lamports: u64,
    },
    AdvanceNonceAccount,
    InitializeNonceAccount {
        authority: Pubkey,
    },
    Other(u32),
}

impl SystemInstruction {
    /// Parse instruction data. Truncated data is an error; trailing bytes
    /// are too, because the ledger would reject them.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let tag = read_u32(data, 0)?;
        let (ix, consumed) = match tag {
            CREATE_ACCOUNT => (
                Self::CreateAccount {
                    lamports: read_u64(data, 4)?,
                    space: read_u64(data, 12)?,
                    owner: read_pubkey(data, 20)?,
                },
                52,
            ),
            TRANSFER => (
                Self::Transfer {
                    lamports: read_u64(data, 4)?,
                },
                12,
            ),
            ADVANCE_NONCE_ACCOUNT => (Self::AdvanceNonceAccount, 4),
            INITIALIZE_NONCE_ACCOUNT => (
                Self::InitializeNonceAccount {
                    authority: read_pubkey(data, 4)?,
                },
                36,
            ),
            other => return Ok(Self::Other(other)),
        };
        if data.len() != consumed {
            return Err(CodecError::TrailingBytes);
        }
        Ok(ix)
    }
}

fn read_u32(data: &[u8], at: usize) -> Result<u32, CodecError> {
    let bytes = data.get(at..at + 4).ok_or(CodecError::UnexpectedEnd)?;
    let mut arr = [0u8; 4];
    arr.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(arr))
}

fn read_u64(data: &[u8], at: usize) -> Result<u64, CodecError> {
    let bytes = data.get(at..at + 8).ok_or(CodecError::UnexpectedEnd)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(arr))
}

fn read_pubkey(data: &[u8], at: usize) -> Result<Pubkey, CodecError> {
    let bytes = data.get(at..at + 32).ok_or(CodecError::UnexpectedEnd)?;
    Pubkey::try_from_slice(bytes).map_err(|_| CodecError::UnexpectedEnd)
}

/// Create and fund a new account owned by `owner`. Both `from` and
/// `new_account` must sign.
pub fn create_account(
    from: &Pubkey,
    new_account: &Pubkey,
    lamports: u64,
    space: u64,
    owner: &Pubkey,
) -> Instruction {
    let mut data = Vec::with_capacity(52);
    data.extend_from_slice(&CREATE_ACCOUNT.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    data.extend_from_slice(&space.to_le_bytes());
    data.extend_from_slice(owner.as_bytes());
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![AccountMeta::new(*from, true), AccountMeta::new(*new_account, true)],
        data,
    }
}

/// Move lamports between two system accounts.
pub fn transfer(from: &Pubkey, to: &Pubkey, lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&TRANSFER.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![AccountMeta::new(*from, true), AccountMeta::new(*to, false)],
        data,
    }
}

/// Consume the stored nonce and roll it forward. Must be the first
/// instruction of a durable transaction.
pub fn advance_nonce_account(nonce_account: &Pubkey, authority: &Pubkey) -> Instruction {
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*nonce_account, false),
            AccountMeta::new_readonly(SYSVAR_RECENT_BLOCKHASHES_ID, false),
            AccountMeta::new_readonly(*authority, true),
        ],
        data: ADVANCE_NONCE_ACCOUNT.to_le_bytes().to_vec(),
    }
}

pub fn initialize_nonce_account(nonce_account: &Pubkey, authority: &Pubkey) -> Instruction {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&INITIALIZE_NONCE_ACCOUNT.to_le_bytes());
    data.extend_from_slice(authority.as_bytes());
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*nonce_account, false),
            AccountMeta::new_readonly(SYSVAR_RECENT_BLOCKHASHES_ID, false),
            AccountMeta::new_readonly(SYSVAR_RENT_ID, false),
        ],
        data,
    }
}

/// The two instructions that bring a nonce account into existence.
pub fn create_nonce_account(
    from: &Pubkey,
    nonce_account: &Pubkey,
    authority: &Pubkey,
    lamports: u64,
) -> Vec<Instruction> {
    vec![
        create_account(
            from,
            nonce_account,
            lamports,
            NONCE_ACCOUNT_LENGTH,
            &SYSTEM_PROGRAM_ID,
        ),
        initialize_nonce_account(nonce_account, authority),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_data_layout() {
        let ix = transfer(&Pubkey::new([1; 32]), &Pubkey::new([2; 32]), 1_000);
        assert_eq!(&ix.data[..4], &[2, 0, 0, 0]);
        assert_eq!(&ix.data[4..], &1_000u64.to_le_bytes());
        assert!(ix.accounts[0].is_signer && ix.accounts[0].is_writable);
        assert!(!ix.accounts[1].is_signer && ix.accounts[1].is_writable);
    }

    #[test]
    fn advance_nonce_account_layout() {
        let nonce = Pubkey::new([3; 32]);
        let auth = Pubkey::new([4; 32]);
        let ix = advance_nonce_account(&nonce, &auth);
        assert_eq!(ix.data, vec![4, 0, 0, 0]);
        assert_eq!(ix.accounts.len(), 3);
        assert_eq!(ix.accounts[1].pubkey, SYSVAR_RECENT_BLOCKHASHES_ID);
        assert!(ix.accounts[2].is_signer && !ix.accounts[2].is_writable);
    }

    #[test]
    fn create_nonce_account_is_two_instructions() {
        let ixs = create_nonce_account(
            &Pubkey::new([1; 32]),
            &Pubkey::new([2; 32]),
            &Pubkey::new([1; 32]),
            1_447_680,
        );
        assert_eq!(ixs.len(), 2);
        assert_eq!(
            SystemInstruction::decode(&ixs[0].data).unwrap(),
            SystemInstruction::CreateAccount {
                lamports: 1_447_680,
                space: 80,
                owner: SYSTEM_PROGRAM_ID
            }
        );
        assert_eq!(
            SystemInstruction::decode(&ixs[1].data).unwrap(),
            SystemInstruction::InitializeNonceAccount {
                authority: Pubkey::new([1; 32])
            }
        );
    }

    #[test]
    fn decode_rejects_truncated_and_trailing() {
        assert_eq!(
            SystemInstruction::decode(&[2, 0, 0, 0, 1]),
            Err(CodecError::UnexpectedEnd)
        );
        assert_eq!(
            SystemInstruction::decode(&[4, 0, 0, 0, 0]),
            Err(CodecError::TrailingBytes)
        );
        assert_eq!(
            SystemInstruction::decode(&[9, 0, 0, 0]).unwrap(),
            SystemInstruction::Other(9)
        );
    }
}
