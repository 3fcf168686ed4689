//! # Ledger Transaction Codec
//!
//! Just enough of a Solana-style ledger client to build, sign, inspect
//! and submit the transactions MeshStealth needs:
//!
//! ```text
//! pubkey.rs         Pubkey / Hash / Signature, base58 display
//! shortvec.rs       compact-u16 length prefixes
//! instruction.rs    AccountMeta, Instruction, system-program builders
//! message.rs        account ordering, header, message wire format
//! transaction.rs    Signer trait, signing, verification, wire format
//! durable.rs        durable-nonce transfers, nonce creation, sweeps
//! announce.rs       on-chain KEM ciphertext announcements
//! nonce_account.rs  80-byte nonce account layout
//! rpc.rs            LedgerClient trait and LedgerError
//! simulated.rs      in-process ledger for tests and offline demos
//! ```
//!
//! There is no HTTP client in here. The host app implements
//! [`LedgerClient`] over its own networking stack.

pub mod announce;
pub mod durable;
pub mod instruction;
pub mod message;
pub mod nonce_account;
pub mod pubkey;
pub mod rpc;
pub mod shortvec;
pub mod simulated;
pub mod transaction;

use thiserror::Error;

pub use announce::{
    announce_payment, ciphertext_account_address, AnnounceError, CiphertextAccount,
};
pub use durable::{
    advance_nonce_transaction, create_nonce_account_transaction, durable_transfer,
    immediate_transfer, sweep_transfer, DurableTransferSummary,
};
pub use instruction::{AccountMeta, Instruction, SystemInstruction};
pub use message::{CompiledInstruction, Message, MessageHeader};
pub use nonce_account::NonceAccountState;
pub use pubkey::{
    Hash, ParsePubkeyError, Pubkey, Signature, SYSTEM_PROGRAM_ID, SYSVAR_RECENT_BLOCKHASHES_ID,
    SYSVAR_RENT_ID,
};
pub use rpc::{with_timeout, LedgerClient, LedgerError, LedgerResult};
pub use simulated::SimulatedLedger;
pub use transaction::{verify_signature, Signer, Transaction};

/// Encoding, decoding and signing failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("length {0} does not fit in a shortvec")]
    LengthOverflow(usize),

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("malformed shortvec length")]
    InvalidShortVec,

    #[error("trailing bytes after end of input")]
    TrailingBytes,

    #[error("too many accounts: {0}")]
    TooManyAccounts(usize),

    #[error("account index out of range")]
    AccountIndexOutOfRange,

    #[error("invalid message header")]
    InvalidHeader,

    #[error("signature count mismatch: expected {expected}, got {got}")]
    SignatureCountMismatch { expected: usize, got: usize },

    #[error("{0} is not a required signer")]
    UnknownSigner(Pubkey),

    #[error("invalid signature for {0}")]
    InvalidSignature(Pubkey),

    #[error("not a durable transfer: {0}")]
    NotDurableTransfer(&'static str),

    #[error("invalid nonce account: {0}")]
    InvalidNonceAccount(&'static str),
}
