//! Durable-nonce transfers: building them, and checking one someone
//! handed us over the mesh.
//!
//! A durable transfer is exactly two instructions:
//!
//! 1. `AdvanceNonceAccount(nonce_account, authority)`
//! 2. `Transfer(payer → recipient, lamports)`
//!
//! with the nonce account's stored value in the blockhash slot. It stays
//! valid until someone advances that nonce, so it can sit in a phone for
//! days before anybody broadcasts it.

use super::instruction::{
    advance_nonce_account, create_nonce_account, transfer, SystemInstruction,
};
use super::message::Message;
use super::pubkey::{Hash, Pubkey, SYSTEM_PROGRAM_ID};
use super::transaction::{Signer, Transaction};
use super::CodecError;

/// Pre-sign a transfer against a durable nonce. `payer` is both the fee
/// payer and the nonce authority.
pub fn durable_transfer(
    payer: &dyn Signer,
    nonce_account: &Pubkey,
    nonce_value: Hash,
    recipient: &Pubkey,
    lamports: u64,
) -> Result<Transaction, CodecError> {
    let payer_key = payer.pubkey();
    let instructions = [
        advance_nonce_account(nonce_account, &payer_key),
        transfer(&payer_key, recipient, lamports),
    ];
    let message = Message::compile(&instructions, &payer_key, nonce_value)?;
    let mut tx = Transaction::new_unsigned(message);
    tx.sign(&[payer])?;
    Ok(tx)
}

/// Create and initialize a nonce account in one transaction. Both the
/// payer and the fresh nonce account key sign.
pub fn create_nonce_account_transaction(
    payer: &dyn Signer,
    nonce_account: &dyn Signer,
    rent_lamports: u64,
    recent_blockhash: Hash,
) -> Result<Transaction, CodecError> {
    let payer_key = payer.pubkey();
    let instructions = create_nonce_account(
        &payer_key,
        &nonce_account.pubkey(),
        &payer_key,
        rent_lamports,
    );
    let message = Message::compile(&instructions, &payer_key, recent_blockhash)?;
    let mut tx = Transaction::new_unsigned(message);
    tx.sign(&[payer, nonce_account])?;
    Ok(tx)
}

/// Advance a nonce on its own, voiding anything pre-signed against
/// `nonce_value`.
pub fn advance_nonce_transaction(
    authority: &dyn Signer,
    nonce_account: &Pubkey,
    nonce_value: Hash,
) -> Result<Transaction, CodecError> {
    let authority_key = authority.pubkey();
    let message = Message::compile(
        &[advance_nonce_account(nonce_account, &authority_key)],
        &authority_key,
        nonce_value,
    )?;
    let mut tx = Transaction::new_unsigned(message);
    tx.sign(&[authority])?;
    Ok(tx)
}

/// A plain transfer against a recent blockhash, for payments settled the
/// moment they are made.
pub fn immediate_transfer(
    payer: &dyn Signer,
    recipient: &Pubkey,
    lamports: u64,
    recent_blockhash: Hash,
) -> Result<Transaction, CodecError> {
    let payer_key = payer.pubkey();
    let message = Message::compile(
        &[transfer(&payer_key, recipient, lamports)],
        &payer_key,
        recent_blockhash,
    )?;
    let mut tx = Transaction::new_unsigned(message);
    tx.sign(&[payer])?;
    Ok(tx)
}

/// Move funds out of a stealth one-time address. The stealth signer pays
/// its own fee, so `lamports` should leave room for it.
pub fn sweep_transfer(
    owner: &dyn Signer,
    destination: &Pubkey,
    lamports: u64,
    recent_blockhash: Hash,
) -> Result<Transaction, CodecError> {
    immediate_transfer(owner, destination, lamports, recent_blockhash)
}

/// What a durable transfer claims to do, read back from its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableTransferSummary {
    pub fee_payer: Pubkey,
    pub nonce_account: Pubkey,
    pub nonce_authority: Pubkey,
    pub nonce_value: Hash,
    pub source: Pubkey,
    pub recipient: Pubkey,
    pub lamports: u64,
}

impl DurableTransferSummary {
    /// Decode `tx` as a durable transfer. Anything other than the exact
    /// advance-then-transfer shape is rejected, as is a bad signature.
    pub fn inspect(tx: &Transaction) -> Result<Self, CodecError> {
        tx.verify()?;
        let msg = &tx.message;
        let [advance, pay] = msg.instructions.as_slice() else {
            return Err(CodecError::NotDurableTransfer("expected two instructions"));
        };

        for ix in [advance, pay] {
            if msg.program_id(ix) != Some(&SYSTEM_PROGRAM_ID) {
                return Err(CodecError::NotDurableTransfer("non-system instruction"));
            }
        }

        if SystemInstruction::decode(&advance.data)? != SystemInstruction::AdvanceNonceAccount {
            return Err(CodecError::NotDurableTransfer(
                "first instruction must advance the nonce",
            ));
        }
        let lamports = match SystemInstruction::decode(&pay.data)? {
            SystemInstruction::Transfer { lamports } => lamports,
            _ => {
                return Err(CodecError::NotDurableTransfer(
                    "second instruction must be a transfer",
                ))
            }
        };

        let key = |ix, pos| {
            msg.account_key(ix, pos)
                .copied()
                .ok_or(CodecError::AccountIndexOutOfRange)
        };
        let nonce_account = key(advance, 0)?;
        let nonce_authority = key(advance, 2)?;
        let source = key(pay, 0)?;
        let recipient = key(pay, 1)?;
        let fee_payer = *msg
            .fee_payer()
            .ok_or(CodecError::NotDurableTransfer("no fee payer"))?;

        Ok(Self {
            fee_payer,
            nonce_account,
            nonce_authority,
            nonce_value: msg.recent_blockhash,
            source,
            recipient,
            lamports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::LedgerKeypair;

    #[test]
    fn durable_transfer_inspects_cleanly() {
        let payer = LedgerKeypair::generate();
        let nonce = Pubkey::new([2; 32]);
        let recipient = Pubkey::new([3; 32]);
        let tx = durable_transfer(&payer, &nonce, Hash::new([8; 32]), &recipient, 25_000).unwrap();

        let summary = DurableTransferSummary::inspect(&tx).unwrap();
        assert_eq!(summary.fee_payer, payer.pubkey());
        assert_eq!(summary.nonce_account, nonce);
        assert_eq!(summary.nonce_authority, payer.pubkey());
        assert_eq!(summary.nonce_value, Hash::new([8; 32]));
        assert_eq!(summary.source, payer.pubkey());
        assert_eq!(summary.recipient, recipient);
        assert_eq!(summary.lamports, 25_000);
    }

    #[test]
    fn plain_transfer_is_not_durable() {
        let payer = LedgerKeypair::generate();
        let tx = sweep_transfer(&payer, &Pubkey::new([3; 32]), 1, Hash::default()).unwrap();
        assert!(matches!(
            DurableTransferSummary::inspect(&tx),
            Err(CodecError::NotDurableTransfer(_))
        ));
    }

    #[test]
    fn unsigned_durable_transfer_rejected() {
        let payer = LedgerKeypair::generate();
        let mut tx = durable_transfer(
            &payer,
            &Pubkey::new([2; 32]),
            Hash::default(),
            &Pubkey::new([3; 32]),
            1,
        )
        .unwrap();
        tx.signatures[0] = Default::default();
        assert!(DurableTransferSummary::inspect(&tx).is_err());
    }

    #[test]
    fn advance_alone_is_not_a_transfer() {
        let authority = LedgerKeypair::generate();
        let nonce = Pubkey::new([2; 32]);
        let tx = advance_nonce_transaction(&authority, &nonce, Hash::new([4; 32])).unwrap();
        tx.verify().unwrap();
        assert_eq!(tx.message.recent_blockhash, Hash::new([4; 32]));
        assert_eq!(tx.message.instructions.len(), 1);
        assert!(DurableTransferSummary::inspect(&tx).is_err());
    }

    #[test]
    fn nonce_account_creation_is_fully_signed() {
        let payer = LedgerKeypair::generate();
        let nonce = LedgerKeypair::generate();
        let tx = create_nonce_account_transaction(&payer, &nonce, 1_447_680, Hash::default())
            .unwrap();
        assert!(tx.is_fully_signed());
        assert_eq!(tx.signatures.len(), 2);
        tx.verify().unwrap();
    }
}
