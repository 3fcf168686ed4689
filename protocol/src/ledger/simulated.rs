//! # SimulatedLedger
//!
//! An in-process ledger that executes the system-program subset this crate
//! produces: account creation, transfers, nonce initialization and nonce
//! advancement. It verifies signatures, charges fees, tracks a sliding
//! window of recent blockhashes, and remembers processed transaction ids.
//!
//! Good enough to drive the nonce pool and the settlement engine end to end
//! without a network. Faults can be queued to exercise retry paths.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::instruction::SystemInstruction;
use super::message::{CompiledInstruction, Message};
use super::nonce_account::NonceAccountState;
use super::pubkey::{Hash, Pubkey, Signature, SYSTEM_PROGRAM_ID};
use super::rpc::{LedgerClient, LedgerError, LedgerResult};
use super::transaction::Transaction;
use crate::config::NONCE_ACCOUNT_LENGTH;
use crate::crypto::hash::blake3_hash;

/// Flat fee charged per required signature.
pub const SIMULATED_FEE_PER_SIGNATURE: u64 = 5_000;

/// How many past blockhashes a regular transaction may reference.
const RECENT_BLOCKHASH_WINDOW: usize = 150;

/// Rent parameters: 128 bytes of per-account overhead, 3480 lamports per
/// byte-year, two years to be exempt.
const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;
const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;
const EXEMPTION_YEARS: u64 = 2;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    balances: HashMap<Pubkey, u64>,
    /// `None` means created with nonce-account space but not initialized.
    nonce_accounts: HashMap<Pubkey, Option<NonceAccountState>>,
    recent_blockhashes: VecDeque<Hash>,
    processed: HashSet<Signature>,
    slot: u64,
}

impl LedgerState {
    fn latest_blockhash(&self) -> Hash {
        self.recent_blockhashes.back().copied().unwrap_or_default()
    }

    fn produce_blockhash(&mut self) -> Hash {
        self.slot += 1;
        let mut seed = self.latest_blockhash().to_bytes().to_vec();
        seed.extend_from_slice(&self.slot.to_le_bytes());
        let hash = Hash::new(blake3_hash(&seed));
        self.recent_blockhashes.push_back(hash);
        while self.recent_blockhashes.len() > RECENT_BLOCKHASH_WINDOW {
            self.recent_blockhashes.pop_front();
        }
        hash
    }

    fn durable_nonce_for(&self, account: &Pubkey) -> Hash {
        let mut seed = b"durable-nonce".to_vec();
        seed.extend_from_slice(self.latest_blockhash().as_bytes());
        seed.extend_from_slice(account.as_bytes());
        seed.extend_from_slice(&self.slot.to_le_bytes());
        Hash::new(blake3_hash(&seed))
    }

    fn debit(&mut self, from: &Pubkey, lamports: u64) -> LedgerResult<()> {
        let balance = self.balances.entry(*from).or_insert(0);
        *balance = balance
            .checked_sub(lamports)
            .ok_or_else(|| LedgerError::ExecutionFailed(format!("insufficient funds in {from}")))?;
        Ok(())
    }

    fn credit(&mut self, to: &Pubkey, lamports: u64) {
        *self.balances.entry(*to).or_insert(0) += lamports;
    }
}

/// In-memory ledger implementing [`LedgerClient`].
#[derive(Debug)]
pub struct SimulatedLedger {
    state: Mutex<LedgerState>,
    faults: Mutex<VecDeque<LedgerError>>,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    pub fn new() -> Self {
        let mut state = LedgerState::default();
        state.produce_blockhash();
        Self {
            state: Mutex::new(state),
            faults: Mutex::new(VecDeque::new()),
        }
    }

    /// Mint lamports out of thin air.
    pub fn airdrop(&self, to: &Pubkey, lamports: u64) {
        self.state.lock().credit(to, lamports);
    }

    pub fn balance(&self, of: &Pubkey) -> u64 {
        self.state.lock().balances.get(of).copied().unwrap_or(0)
    }

    /// Current stored value of a nonce account, if initialized.
    pub fn nonce_value(&self, account: &Pubkey) -> Option<Hash> {
        self.state
            .lock()
            .nonce_accounts
            .get(account)
            .copied()
            .flatten()
            .map(|s| s.nonce)
    }

    /// Advance a nonce account out-of-band, as if another transaction had
    /// consumed it.
    pub fn bump_nonce(&self, account: &Pubkey) {
        let mut state = self.state.lock();
        let fresh = state.durable_nonce_for(account);
        state.produce_blockhash();
        if let Some(Some(nonce)) = state.nonce_accounts.get_mut(account) {
            nonce.nonce = fresh;
        }
    }

    /// Queue an error. Each queued error is returned by exactly one
    /// subsequent call, in order.
    pub fn inject_fault(&self, error: LedgerError) {
        self.faults.lock().push_back(error);
    }

    pub fn processed_count(&self) -> usize {
        self.state.lock().processed.len()
    }

    fn take_fault(&self) -> LedgerResult<()> {
        match self.faults.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn execute(&self, tx: &Transaction) -> LedgerResult<Signature> {
        tx.verify()
            .map_err(|e| LedgerError::ExecutionFailed(e.to_string()))?;
        let id = *tx
            .id()
            .ok_or_else(|| LedgerError::ExecutionFailed("unsigned transaction".into()))?;

        let mut state = self.state.lock();
        if state.processed.contains(&id) {
            return Err(LedgerError::AlreadyProcessed);
        }

        // Work on a copy so a failing instruction leaves no trace.
        let mut next = state.clone();
        let msg = &tx.message;

        let durable = msg
            .instructions
            .first()
            .map(|ix| {
                msg.program_id(ix) == Some(&SYSTEM_PROGRAM_ID)
                    && SystemInstruction::decode(&ix.data).ok()
                        == Some(SystemInstruction::AdvanceNonceAccount)
            })
            .unwrap_or(false);

        if durable {
            let first = &msg.instructions[0];
            let (account, _) = account_at(msg, first, 0)?;
            let stored = next.nonce_accounts.get(&account).copied().flatten();
            if stored.map(|s| s.nonce) != Some(msg.recent_blockhash) {
                return Err(LedgerError::ExecutionFailed(
                    "blockhash not found: durable nonce mismatch".into(),
                ));
            }
        } else if !next.recent_blockhashes.contains(&msg.recent_blockhash) {
            return Err(LedgerError::ExecutionFailed("blockhash not found".into()));
        }

        let fee_payer = *msg
            .fee_payer()
            .ok_or_else(|| LedgerError::ExecutionFailed("no fee payer".into()))?;
        let fee = SIMULATED_FEE_PER_SIGNATURE * tx.signatures.len() as u64;
        next.debit(&fee_payer, fee)?;

        for ix in &msg.instructions {
            apply_instruction(&mut next, msg, ix)?;
        }

        next.processed.insert(id);
        next.produce_blockhash();
        *state = next;
        debug!(tx = %id, "simulated ledger processed transaction");
        Ok(id)
    }
}

fn account_at(
    msg: &Message,
    ix: &CompiledInstruction,
    position: usize,
) -> LedgerResult<(Pubkey, bool)> {
    let index = *ix
        .accounts
        .get(position)
        .ok_or_else(|| LedgerError::ExecutionFailed("missing account".into()))?
        as usize;
    let key = msg
        .account_keys
        .get(index)
        .ok_or_else(|| LedgerError::ExecutionFailed("account index out of range".into()))?;
    Ok((*key, msg.is_signer(index)))
}

fn require_signer(signed: bool, who: &Pubkey) -> LedgerResult<()> {
    if signed {
        Ok(())
    } else {
        Err(LedgerError::ExecutionFailed(format!(
            "missing required signature for {who}"
        )))
    }
}

fn apply_instruction(
    state: &mut LedgerState,
    msg: &Message,
    ix: &CompiledInstruction,
) -> LedgerResult<()> {
    if msg.program_id(ix) != Some(&SYSTEM_PROGRAM_ID) {
        return Err(LedgerError::ExecutionFailed("unsupported program".into()));
    }
    let decoded = SystemInstruction::decode(&ix.data)
        .map_err(|e| LedgerError::ExecutionFailed(e.to_string()))?;

    match decoded {
        SystemInstruction::CreateAccount {
            lamports, space, ..
        } => {
            let (from, from_signed) = account_at(msg, ix, 0)?;
            let (new, new_signed) = account_at(msg, ix, 1)?;
            require_signer(from_signed, &from)?;
            require_signer(new_signed, &new)?;
            if state.balances.get(&new).copied().unwrap_or(0) > 0
                || state.nonce_accounts.contains_key(&new)
            {
                return Err(LedgerError::ExecutionFailed(format!(
                    "account {new} already in use"
                )));
            }
            state.debit(&from, lamports)?;
            state.credit(&new, lamports);
            if space == NONCE_ACCOUNT_LENGTH {
                state.nonce_accounts.insert(new, None);
            }
        }
        SystemInstruction::Transfer { lamports } => {
            let (from, from_signed) = account_at(msg, ix, 0)?;
            let (to, _) = account_at(msg, ix, 1)?;
            require_signer(from_signed, &from)?;
            state.debit(&from, lamports)?;
            state.credit(&to, lamports);
        }
        SystemInstruction::AdvanceNonceAccount => {
            let (account, _) = account_at(msg, ix, 0)?;
            let (authority, signed) = account_at(msg, ix, 2)?;
            require_signer(signed, &authority)?;
            let fresh = state.durable_nonce_for(&account);
            match state.nonce_accounts.get_mut(&account) {
                Some(Some(nonce)) if nonce.authority == authority => nonce.nonce = fresh,
                Some(Some(_)) => {
                    return Err(LedgerError::ExecutionFailed("wrong nonce authority".into()))
                }
                _ => {
                    return Err(LedgerError::ExecutionFailed(
                        "not an initialized nonce account".into(),
                    ))
                }
            }
        }
        SystemInstruction::InitializeNonceAccount { authority } => {
            let (account, _) = account_at(msg, ix, 0)?;
            let fresh = state.durable_nonce_for(&account);
            match state.nonce_accounts.get_mut(&account) {
                Some(slot) if slot.is_none() => {
                    *slot = Some(NonceAccountState {
                        authority,
                        nonce: fresh,
                        lamports_per_signature: SIMULATED_FEE_PER_SIGNATURE,
                    })
                }
                _ => {
                    return Err(LedgerError::ExecutionFailed(
                        "nonce account missing or already initialized".into(),
                    ))
                }
            }
        }
        SystemInstruction::Other(tag) => {
            return Err(LedgerError::ExecutionFailed(format!(
                "unsupported system instruction {tag}"
            )))
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn get_nonce_account(&self, address: &Pubkey) -> LedgerResult<Option<NonceAccountState>> {
        self.take_fault()?;
        Ok(self
            .state
            .lock()
            .nonce_accounts
            .get(address)
            .copied()
            .flatten())
    }

    async fn get_latest_blockhash(&self) -> LedgerResult<Hash> {
        self.take_fault()?;
        Ok(self.state.lock().latest_blockhash())
    }

    async fn minimum_balance_for_rent_exemption(&self, data_len: u64) -> LedgerResult<u64> {
        self.take_fault()?;
        Ok((ACCOUNT_STORAGE_OVERHEAD + data_len) * LAMPORTS_PER_BYTE_YEAR * EXEMPTION_YEARS)
    }

    async fn send_transaction(&self, tx: &Transaction) -> LedgerResult<Signature> {
        self.take_fault()?;
        self.execute(tx)
    }

    async fn confirm_transaction(&self, signature: &Signature) -> LedgerResult<bool> {
        self.take_fault()?;
        Ok(self.state.lock().processed.contains(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NONCE_ACCOUNT_RENT_EXEMPT_LAMPORTS;
    use crate::crypto::LedgerKeypair;
    use crate::ledger::durable::{create_nonce_account_transaction, durable_transfer, sweep_transfer};

    async fn funded_nonce(ledger: &SimulatedLedger, payer: &LedgerKeypair) -> Pubkey {
        let nonce = LedgerKeypair::generate();
        let blockhash = ledger.get_latest_blockhash().await.unwrap();
        let rent = ledger
            .minimum_balance_for_rent_exemption(NONCE_ACCOUNT_LENGTH)
            .await
            .unwrap();
        let tx = create_nonce_account_transaction(payer, &nonce, rent, blockhash).unwrap();
        ledger.send_transaction(&tx).await.unwrap();
        nonce.pubkey()
    }

    #[tokio::test]
    async fn rent_matches_known_constant() {
        let ledger = SimulatedLedger::new();
        assert_eq!(
            ledger.minimum_balance_for_rent_exemption(80).await.unwrap(),
            NONCE_ACCOUNT_RENT_EXEMPT_LAMPORTS
        );
    }

    #[tokio::test]
    async fn nonce_account_lifecycle() {
        let ledger = SimulatedLedger::new();
        let payer = LedgerKeypair::generate();
        ledger.airdrop(&payer.pubkey(), 10_000_000);

        let nonce = funded_nonce(&ledger, &payer).await;
        let state = ledger.get_nonce_account(&nonce).await.unwrap().unwrap();
        assert_eq!(state.authority, payer.pubkey());
        assert_eq!(ledger.balance(&nonce), NONCE_ACCOUNT_RENT_EXEMPT_LAMPORTS);

        let recipient = Pubkey::new([9; 32]);
        let tx = durable_transfer(&payer, &nonce, state.nonce, &recipient, 50_000).unwrap();
        let id = ledger.send_transaction(&tx).await.unwrap();
        assert!(ledger.confirm_transaction(&id).await.unwrap());
        assert_eq!(ledger.balance(&recipient), 50_000);
        assert_ne!(ledger.nonce_value(&nonce), Some(state.nonce));

        // Same bytes again: already processed.
        assert_eq!(
            ledger.send_transaction(&tx).await,
            Err(LedgerError::AlreadyProcessed)
        );
    }

    #[tokio::test]
    async fn stale_nonce_fails_execution() {
        let ledger = SimulatedLedger::new();
        let payer = LedgerKeypair::generate();
        ledger.airdrop(&payer.pubkey(), 10_000_000);
        let nonce = funded_nonce(&ledger, &payer).await;
        let value = ledger.nonce_value(&nonce).unwrap();

        ledger.bump_nonce(&nonce);
        let tx = durable_transfer(&payer, &nonce, value, &Pubkey::new([9; 32]), 1).unwrap();
        assert!(matches!(
            ledger.send_transaction(&tx).await,
            Err(LedgerError::ExecutionFailed(_))
        ));
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_trace() {
        let ledger = SimulatedLedger::new();
        let payer = LedgerKeypair::generate();
        ledger.airdrop(&payer.pubkey(), 20_000);
        let blockhash = ledger.get_latest_blockhash().await.unwrap();
        let tx = sweep_transfer(&payer, &Pubkey::new([3; 32]), 1_000_000, blockhash).unwrap();
        assert!(ledger.send_transaction(&tx).await.is_err());
        assert_eq!(ledger.balance(&payer.pubkey()), 20_000);
        assert_eq!(ledger.processed_count(), 0);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let ledger = SimulatedLedger::new();
        ledger.inject_fault(LedgerError::RateLimited);
        ledger.inject_fault(LedgerError::Timeout);
        assert_eq!(
            ledger.get_latest_blockhash().await,
            Err(LedgerError::RateLimited)
        );
        assert_eq!(ledger.get_latest_blockhash().await, Err(LedgerError::Timeout));
        assert!(ledger.get_latest_blockhash().await.is_ok());
    }

    #[tokio::test]
    async fn unknown_blockhash_rejected() {
        let ledger = SimulatedLedger::new();
        let payer = LedgerKeypair::generate();
        ledger.airdrop(&payer.pubkey(), 1_000_000);
        let tx = sweep_transfer(&payer, &Pubkey::new([3; 32]), 1, Hash::new([0xAB; 32])).unwrap();
        assert!(matches!(
            ledger.send_transaction(&tx).await,
            Err(LedgerError::ExecutionFailed(_))
        ));
    }
}
