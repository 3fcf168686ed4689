//! # Ciphertext Announcements
//!
//! Client side of the `stealth-pq` on-chain program. A hybrid payment's
//! ML-KEM ciphertext is too big for the mesh-free path (a sender paying
//! straight to the ledger has no other channel to the recipient), so the
//! program parks it in a per-address account:
//!
//! ```text
//! PDA ["ciphertext", one_time_address]
//!   discriminator   8
//!   stealth_pubkey  32
//!   ephemeral       32
//!   kem_ciphertext  1088
//!   created_at      8   (i64 LE, unix seconds)
//!   bump            1
//! ```
//!
//! 1088 bytes don't fit one ledger packet next to everything else, so the
//! ciphertext is written in two chunks: `init_ciphertext` creates the
//! account with the first 512 bytes, `complete_ciphertext` writes the rest.
//! The recipient closes the account with `reclaim_rent` once spent.
//!
//! Instruction data is an 8-byte method discriminator followed by the
//! arguments, little-endian, vectors prefixed with a `u32` length.

use curve25519_dalek::edwards::CompressedEdwardsY;
use thiserror::Error;

use super::instruction::{AccountMeta, Instruction};
use super::message::Message;
use super::pubkey::{Hash, Pubkey, SYSTEM_PROGRAM_ID};
use super::transaction::{Signer, Transaction};
use super::CodecError;
use crate::config::KEM_CIPHERTEXT_LENGTH;
use crate::crypto::hash::sha256;

/// `5YXYyH7i9WnQz1Hzh8kEuxSU5ws3n1Kor2KdTxnJkv6y`
pub const STEALTH_PQ_PROGRAM_ID: Pubkey = Pubkey::new([
    67, 130, 76, 18, 47, 194, 62, 69, 51, 214, 232, 182, 47, 13, 56, 176, 84, 247, 202, 212, 21,
    185, 3, 13, 170, 27, 133, 83, 80, 236, 86, 118,
]);

pub const CIPHERTEXT_SEED: &[u8] = b"ciphertext";

/// Largest chunk `init_ciphertext` accepts.
pub const INIT_CHUNK_MAX: usize = 512;

/// Account body without the discriminator.
pub const CIPHERTEXT_ACCOUNT_SIZE: usize = 32 + 32 + KEM_CIPHERTEXT_LENGTH + 8 + 1;

/// Bytes allocated on the ledger for one account.
pub const CIPHERTEXT_ACCOUNT_SPACE: usize = DISCRIMINATOR_LENGTH + CIPHERTEXT_ACCOUNT_SIZE;

/// Largest serialized transaction the ledger accepts.
pub const PACKET_DATA_SIZE: usize = 1232;

const DISCRIMINATOR_LENGTH: usize = 8;
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnnounceError {
    #[error("ciphertext chunk of {len} bytes exceeds {max}")]
    ChunkTooLong { len: usize, max: usize },

    #[error("chunk at offset {offset} with {len} bytes overruns the 1088-byte ciphertext")]
    OutOfBounds { offset: usize, len: usize },

    #[error("ciphertext must be 1088 bytes, got {0}")]
    CiphertextLength(usize),

    #[error("transfer amount must be greater than zero")]
    ZeroAmount,

    #[error("no program address found for these seeds")]
    NoProgramAddress,

    #[error("invalid ciphertext account: {0}")]
    InvalidAccount(&'static str),

    #[error("transaction encoding error: {0}")]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// Program addresses
// ---------------------------------------------------------------------------

fn is_on_curve(bytes: &[u8; 32]) -> bool {
    CompressedEdwardsY(*bytes).decompress().is_some()
}

/// `sha256(seeds ‖ program ‖ "ProgramDerivedAddress")`, rejected if it
/// lands on the curve and so could have a private key.
pub fn create_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> Option<Pubkey> {
    let mut preimage = Vec::new();
    for seed in seeds {
        preimage.extend_from_slice(seed);
    }
    preimage.extend_from_slice(program_id.as_bytes());
    preimage.extend_from_slice(PDA_MARKER);
    let hash = sha256(&preimage);
    (!is_on_curve(&hash)).then(|| Pubkey::new(hash))
}

/// First off-curve address searching bumps down from 255.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> Option<(Pubkey, u8)> {
    (0..=u8::MAX).rev().find_map(|bump| {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = seeds.to_vec();
        with_bump.push(&bump_seed);
        create_program_address(&with_bump, program_id).map(|address| (address, bump))
    })
}

/// The ciphertext account for a one-time address, with its bump.
pub fn ciphertext_account_address(
    stealth_address: &Pubkey,
) -> Result<(Pubkey, u8), AnnounceError> {
    find_program_address(
        &[CIPHERTEXT_SEED, stealth_address.as_bytes()],
        &STEALTH_PQ_PROGRAM_ID,
    )
    .ok_or(AnnounceError::NoProgramAddress)
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

fn discriminator(namespace: &str, name: &str) -> [u8; DISCRIMINATOR_LENGTH] {
    let digest = sha256(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LENGTH];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LENGTH]);
    out
}

fn method_data(name: &str, capacity: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(DISCRIMINATOR_LENGTH + capacity);
    data.extend_from_slice(&discriminator("global", name));
    data
}

fn push_bytes(data: &mut Vec<u8>, bytes: &[u8]) {
    // Chunks are bounded well below u32::MAX by the checks before this.
    data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    data.extend_from_slice(bytes);
}

/// Create the ciphertext account and store the ephemeral key plus the
/// first chunk. The sender pays the rent.
pub fn init_ciphertext(
    sender: &Pubkey,
    stealth_address: &Pubkey,
    ephemeral_public: &[u8; 32],
    first_chunk: &[u8],
) -> Result<Instruction, AnnounceError> {
    if first_chunk.len() > INIT_CHUNK_MAX {
        return Err(AnnounceError::ChunkTooLong {
            len: first_chunk.len(),
            max: INIT_CHUNK_MAX,
        });
    }
    let (pda, _) = ciphertext_account_address(stealth_address)?;
    let mut data = method_data("init_ciphertext", 32 + 4 + first_chunk.len());
    data.extend_from_slice(ephemeral_public);
    push_bytes(&mut data, first_chunk);
    Ok(Instruction {
        program_id: STEALTH_PQ_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*sender, true),
            AccountMeta::new(*stealth_address, false),
            AccountMeta::new(pda, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data,
    })
}

/// Write `chunk` at `offset` into an existing ciphertext account.
pub fn complete_ciphertext(
    sender: &Pubkey,
    stealth_address: &Pubkey,
    chunk: &[u8],
    offset: u16,
) -> Result<Instruction, AnnounceError> {
    if usize::from(offset) + chunk.len() > KEM_CIPHERTEXT_LENGTH {
        return Err(AnnounceError::OutOfBounds {
            offset: offset.into(),
            len: chunk.len(),
        });
    }
    let (pda, _) = ciphertext_account_address(stealth_address)?;
    let mut data = method_data("complete_ciphertext", 4 + chunk.len() + 2);
    push_bytes(&mut data, chunk);
    data.extend_from_slice(&offset.to_le_bytes());
    Ok(Instruction {
        program_id: STEALTH_PQ_PROGRAM_ID,
        accounts: vec![AccountMeta::new(*sender, true), AccountMeta::new(pda, false)],
        data,
    })
}

/// Pay a one-time address through the program, which checks that its
/// ciphertext account exists.
pub fn transfer_to_stealth(
    sender: &Pubkey,
    stealth_address: &Pubkey,
    lamports: u64,
) -> Result<Instruction, AnnounceError> {
    if lamports == 0 {
        return Err(AnnounceError::ZeroAmount);
    }
    let (pda, _) = ciphertext_account_address(stealth_address)?;
    let mut data = method_data("transfer_to_stealth", 8);
    data.extend_from_slice(&lamports.to_le_bytes());
    Ok(Instruction {
        program_id: STEALTH_PQ_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*sender, true),
            AccountMeta::new(*stealth_address, false),
            AccountMeta::new_readonly(pda, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data,
    })
}

/// Close the ciphertext account, returning its rent to the one-time
/// address. Signed with the recovered stealth key.
pub fn reclaim_rent(stealth_address: &Pubkey) -> Result<Instruction, AnnounceError> {
    let (pda, _) = ciphertext_account_address(stealth_address)?;
    Ok(Instruction {
        program_id: STEALTH_PQ_PROGRAM_ID,
        accounts: vec![AccountMeta::new(*stealth_address, true), AccountMeta::new(pda, false)],
        data: method_data("reclaim_rent", 0),
    })
}

/// The two transactions that announce a hybrid payment and fund it:
/// `init_ciphertext`, then `complete_ciphertext` with `transfer_to_stealth`.
/// They must land in that order.
pub fn announce_payment(
    sender: &dyn Signer,
    stealth_address: &Pubkey,
    ephemeral_public: &[u8; 32],
    kem_ciphertext: &[u8],
    lamports: u64,
    recent_blockhash: Hash,
) -> Result<[Transaction; 2], AnnounceError> {
    if kem_ciphertext.len() != KEM_CIPHERTEXT_LENGTH {
        return Err(AnnounceError::CiphertextLength(kem_ciphertext.len()));
    }
    let sender_key = sender.pubkey();
    let (head, tail) = kem_ciphertext.split_at(INIT_CHUNK_MAX);

    let init = init_ciphertext(&sender_key, stealth_address, ephemeral_public, head)?;
    let complete = complete_ciphertext(&sender_key, stealth_address, tail, INIT_CHUNK_MAX as u16)?;
    let pay = transfer_to_stealth(&sender_key, stealth_address, lamports)?;

    let sign = |instructions: &[Instruction]| -> Result<Transaction, AnnounceError> {
        let message = Message::compile(instructions, &sender_key, recent_blockhash)?;
        let mut tx = Transaction::new_unsigned(message);
        tx.sign(&[sender])?;
        Ok(tx)
    };
    Ok([sign(&[init])?, sign(&[complete, pay])?])
}

// ---------------------------------------------------------------------------
// Account layout
// ---------------------------------------------------------------------------

/// Decoded ciphertext account.
#[derive(Clone, PartialEq, Eq)]
pub struct CiphertextAccount {
    pub stealth_pubkey: Pubkey,
    pub ephemeral_public: [u8; 32],
    pub kem_ciphertext: Vec<u8>,
    /// Unix seconds.
    pub created_at: i64,
    pub bump: u8,
}

impl std::fmt::Debug for CiphertextAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CiphertextAccount")
            .field("stealth_pubkey", &self.stealth_pubkey)
            .field("created_at", &self.created_at)
            .field("bump", &self.bump)
            .finish_non_exhaustive()
    }
}

impl CiphertextAccount {
    pub fn account_discriminator() -> [u8; DISCRIMINATOR_LENGTH] {
        discriminator("account", "CiphertextAccount")
    }

    /// Full account data, discriminator included.
    pub fn encode(&self) -> Result<Vec<u8>, AnnounceError> {
        if self.kem_ciphertext.len() != KEM_CIPHERTEXT_LENGTH {
            return Err(AnnounceError::CiphertextLength(self.kem_ciphertext.len()));
        }
        let mut out = Vec::with_capacity(CIPHERTEXT_ACCOUNT_SPACE);
        out.extend_from_slice(&Self::account_discriminator());
        out.extend_from_slice(self.stealth_pubkey.as_bytes());
        out.extend_from_slice(&self.ephemeral_public);
        out.extend_from_slice(&self.kem_ciphertext);
        out.extend_from_slice(&self.created_at.to_le_bytes());
        out.push(self.bump);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self, AnnounceError> {
        if data.len() < CIPHERTEXT_ACCOUNT_SPACE {
            return Err(AnnounceError::InvalidAccount("too short"));
        }
        let (tag, body) = data.split_at(DISCRIMINATOR_LENGTH);
        if tag != Self::account_discriminator() {
            return Err(AnnounceError::InvalidAccount("wrong discriminator"));
        }
        let (stealth, body) = body.split_at(32);
        let (ephemeral, body) = body.split_at(32);
        let (ciphertext, body) = body.split_at(KEM_CIPHERTEXT_LENGTH);
        let (created_at, body) = body.split_at(8);

        let stealth_pubkey = Pubkey::try_from_slice(stealth)
            .map_err(|_| AnnounceError::InvalidAccount("stealth pubkey"))?;
        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(ephemeral);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(created_at);
        Ok(Self {
            stealth_pubkey,
            ephemeral_public,
            kem_ciphertext: ciphertext.to_vec(),
            created_at: i64::from_le_bytes(ts),
            bump: body[0],
        })
    }

    /// Whether this account sits at the address its contents claim.
    pub fn matches_address(&self, address: &Pubkey) -> bool {
        create_program_address(
            &[CIPHERTEXT_SEED, self.stealth_pubkey.as_bytes(), &[self.bump]],
            &STEALTH_PQ_PROGRAM_ID,
        )
        .as_ref()
            == Some(address)
    }
}
