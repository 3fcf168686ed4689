//! # Durable Nonce Pool
//!
//! A sender keeps a handful of nonce accounts ready so it can pre-sign
//! payments with no connectivity. Each entry moves through
//!
//! ```text
//! Available --reserve--> Reserved --sign--> Signed --consume--> Consumed
//!     ^                     |                  |
//!     +------release--------+                  |
//!     |   (or reservation timeout)             |
//!     +-------------cancel (advance on ledger)-+
//! ```
//!
//! Once a transaction is signed against a nonce it only comes back through
//! [`NoncePool::cancel_signed`], which advances the nonce on the ledger
//! first. The reservation timeout never touches `Signed` entries: handing
//! one out again would sign a second transfer over the same value.
//!
//! Every operation sweeps timed-out reservations before it looks at the
//! pool, using the pool's clock.
//!
//! Reservation refreshes the stored nonce value from the ledger *outside*
//! the lock, then re-checks the entry before claiming it. A concurrent
//! reserver that got there first just sends us to the next entry.
//!
//! Consumed entries are dropped and replaced on the next replenish.
//! The whole pool is written to the key-value store after every change.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{
    now_millis, LEDGER_REQUEST_TIMEOUT, NONCE_ACCOUNT_LENGTH, NONCE_ACCOUNT_RENT_EXEMPT_LAMPORTS,
    NONCE_CREATION_DELAY, NONCE_CREATION_MAX_RETRIES, NONCE_POOL_TARGET_SIZE,
    NONCE_RESERVATION_TIMEOUT,
};
use crate::crypto::LedgerKeypair;
use crate::ledger::{
    advance_nonce_transaction, create_nonce_account_transaction, with_timeout, CodecError, Hash,
    LedgerClient, LedgerError, Pubkey,
};
use crate::storage::{self, KeyValueStore, StoreError};

/// Storage key for the persisted pool.
pub const NONCE_POOL_KEY: &str = "nonce_pool";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonceState {
    Available,
    Reserved,
    /// A transaction has been signed against the stored value.
    Signed,
    Consumed,
}

/// One durable nonce account owned by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceEntry {
    pub address: Pubkey,
    /// Last known stored nonce value.
    pub nonce: Hash,
    pub authority: Pubkey,
    pub state: NonceState,
    /// Unix milliseconds, set while `Reserved` or `Signed`.
    pub reserved_at: Option<u64>,
}

#[derive(Debug, Error)]
pub enum NonceError {
    #[error("no available nonce accounts")]
    PoolEmpty,

    #[error("nonce account {0} is not in the pool")]
    UnknownAccount(Pubkey),

    #[error("nonce account {address}: cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        address: Pubkey,
        from: NonceState,
        to: NonceState,
    },

    #[error("payer {0} is not the pool's nonce authority")]
    AuthorityMismatch(Pubkey),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("transaction encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl NonceError {
    /// Empty pools refill and ledger hiccups pass; everything else needs a
    /// different input.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolEmpty => true,
            Self::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Pool sizing and pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoncePoolConfig {
    pub target_size: usize,
    pub reservation_timeout_ms: u64,
    /// Pause between account creations during replenish.
    pub creation_delay_ms: u64,
    /// Attempts per account during replenish.
    pub creation_max_retries: u32,
    pub request_timeout_ms: u64,
}

impl Default for NoncePoolConfig {
    fn default() -> Self {
        Self {
            target_size: NONCE_POOL_TARGET_SIZE,
            reservation_timeout_ms: NONCE_RESERVATION_TIMEOUT.as_millis() as u64,
            creation_delay_ms: NONCE_CREATION_DELAY.as_millis() as u64,
            creation_max_retries: NONCE_CREATION_MAX_RETRIES,
            request_timeout_ms: LEDGER_REQUEST_TIMEOUT.as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Unix milliseconds source. Tests swap in a manual clock.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct NoncePool {
    authority: Pubkey,
    config: NoncePoolConfig,
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn KeyValueStore>,
    entries: Mutex<Vec<NonceEntry>>,
    clock: Clock,
    /// Held for a whole replenish so two callers can't both top up.
    replenishing: tokio::sync::Mutex<()>,
}

impl NoncePool {
    /// Open the pool for `authority`, restoring any persisted entries.
    pub fn open(
        authority: Pubkey,
        config: NoncePoolConfig,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, NonceError> {
        let entries: Vec<NonceEntry> =
            storage::load(store.as_ref(), NONCE_POOL_KEY)?.unwrap_or_default();
        debug!(entries = entries.len(), "nonce pool restored");
        Ok(Self {
            authority,
            config,
            ledger,
            store,
            entries: Mutex::new(entries),
            clock: Arc::new(now_millis),
            replenishing: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn authority(&self) -> &Pubkey {
        &self.authority
    }

    pub fn entries(&self) -> Vec<NonceEntry> {
        self.swept().clone()
    }

    pub fn get(&self, address: &Pubkey) -> Option<NonceEntry> {
        self.swept().iter().find(|e| e.address == *address).cloned()
    }

    pub fn available_count(&self) -> usize {
        self.count(NonceState::Available)
    }

    pub fn count(&self, state: NonceState) -> usize {
        self.swept().iter().filter(|e| e.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.swept().len()
    }

    pub fn is_empty(&self) -> bool {
        self.swept().is_empty()
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    fn persist(&self, entries: &[NonceEntry]) -> Result<(), NonceError> {
        storage::save(self.store.as_ref(), NONCE_POOL_KEY, &entries)?;
        Ok(())
    }

    /// Lock the entries with timed-out reservations already released.
    fn lock_swept(&self) -> Result<MutexGuard<'_, Vec<NonceEntry>>, NonceError> {
        let mut entries = self.entries.lock();
        if self.sweep_reservations(&mut entries, (self.clock)()) > 0 {
            self.persist(&entries)?;
        }
        Ok(entries)
    }

    /// [`Self::lock_swept`] for read accessors, which can't report a store
    /// failure. The sweep still applies in memory and is persisted by the
    /// next write.
    fn swept(&self) -> MutexGuard<'_, Vec<NonceEntry>> {
        let mut entries = self.entries.lock();
        if self.sweep_reservations(&mut entries, (self.clock)()) > 0 {
            if let Err(e) = self.persist(&entries) {
                warn!(error = %e, "could not persist released reservations");
            }
        }
        entries
    }

    // -- reservation -------------------------------------------------------

    /// Return timed-out reservations to `Available`.
    pub fn release_expired_reservations(&self, now: u64) -> Result<usize, NonceError> {
        let mut entries = self.entries.lock();
        let released = self.sweep_reservations(&mut entries, now);
        if released > 0 {
            self.persist(&entries)?;
        }
        Ok(released)
    }

    fn sweep_reservations(&self, entries: &mut [NonceEntry], now: u64) -> usize {
        let mut released = 0;
        for entry in entries.iter_mut() {
            let timed_out = entry.state == NonceState::Reserved
                && entry
                    .reserved_at
                    .map_or(true, |at| now.saturating_sub(at) > self.config.reservation_timeout_ms);
            if timed_out {
                entry.state = NonceState::Available;
                entry.reserved_at = None;
                released += 1;
                debug!(address = %entry.address, "nonce reservation timed out");
            }
        }
        released
    }

    /// Reserve an available nonce with a freshly fetched value.
    pub async fn reserve_nonce(&self) -> Result<NonceEntry, NonceError> {
        let mut skipped: HashSet<Pubkey> = HashSet::new();
        loop {
            let candidate = {
                let entries = self.lock_swept()?;
                entries
                    .iter()
                    .find(|e| e.state == NonceState::Available && !skipped.contains(&e.address))
                    .map(|e| e.address)
            };
            let address = candidate.ok_or(NonceError::PoolEmpty)?;

            let fetched = with_timeout(
                self.request_timeout(),
                self.ledger.get_nonce_account(&address),
            )
            .await?;

            let mut entries = self.entries.lock();
            let entry = match entries.iter_mut().find(|e| e.address == address) {
                Some(entry) => entry,
                None => {
                    skipped.insert(address);
                    continue;
                }
            };
            if entry.state != NonceState::Available {
                // Someone else claimed it while we were fetching.
                skipped.insert(address);
                continue;
            }
            match fetched {
                Some(state) if state.authority == self.authority => {
                    entry.nonce = state.nonce;
                    entry.state = NonceState::Reserved;
                    entry.reserved_at = Some((self.clock)());
                    let reserved = entry.clone();
                    self.persist(&entries)?;
                    debug!(address = %address, "nonce reserved");
                    return Ok(reserved);
                }
                _ => {
                    warn!(address = %address, "nonce account gone or reassigned, retiring");
                    entry.state = NonceState::Consumed;
                    entry.reserved_at = None;
                    skipped.insert(address);
                    self.persist(&entries)?;
                }
            }
        }
    }

    /// A transaction has been signed against this reservation. From here
    /// the entry is out of reach of the reservation timeout.
    pub fn mark_signed(&self, address: &Pubkey) -> Result<(), NonceError> {
        self.transition(address, NonceState::Signed)
    }

    /// The pre-signed transaction using this nonce has landed.
    pub fn mark_consumed(&self, address: &Pubkey) -> Result<(), NonceError> {
        self.transition(address, NonceState::Consumed)
    }

    /// Give back a reservation that was never signed against.
    pub fn release_nonce(&self, address: &Pubkey) -> Result<(), NonceError> {
        self.transition(address, NonceState::Available)
    }

    fn transition(&self, address: &Pubkey, to: NonceState) -> Result<(), NonceError> {
        use NonceState::*;
        let mut entries = self.lock_swept()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.address == *address)
            .ok_or(NonceError::UnknownAccount(*address))?;
        let allowed = matches!(
            (entry.state, to),
            (Reserved, Available)
                | (Available, Available)
                | (Reserved, Signed)
                | (Reserved, Consumed)
                | (Signed, Consumed)
                | (Available, Consumed)
                | (Consumed, Consumed)
        );
        if !allowed {
            return Err(NonceError::InvalidTransition {
                address: *address,
                from: entry.state,
                to,
            });
        }
        if to != Signed {
            entry.reserved_at = None;
        }
        entry.state = to;
        self.persist(&entries)?;
        Ok(())
    }

    /// Void whatever was signed against a `Signed` nonce and return it to
    /// the pool. If the stored value already moved on, nothing signed
    /// against the old one can land and no transaction is sent.
    pub async fn cancel_signed(
        &self,
        payer: &LedgerKeypair,
        address: &Pubkey,
    ) -> Result<(), NonceError> {
        if payer.pubkey() != self.authority {
            return Err(NonceError::AuthorityMismatch(payer.pubkey()));
        }
        let signed_value = {
            let entries = self.lock_swept()?;
            let entry = entries
                .iter()
                .find(|e| e.address == *address)
                .ok_or(NonceError::UnknownAccount(*address))?;
            if entry.state != NonceState::Signed {
                return Err(NonceError::InvalidTransition {
                    address: *address,
                    from: entry.state,
                    to: NonceState::Available,
                });
            }
            entry.nonce
        };

        let limit = self.request_timeout();
        let current = with_timeout(limit, self.ledger.get_nonce_account(address))
            .await?
            .ok_or_else(|| LedgerError::ExecutionFailed("nonce account not initialized".into()))?;
        let fresh = if current.nonce == signed_value {
            let tx = advance_nonce_transaction(payer, address, signed_value)?;
            with_timeout(limit, self.ledger.send_transaction(&tx)).await?;
            with_timeout(limit, self.ledger.get_nonce_account(address))
                .await?
                .map(|s| s.nonce)
                .unwrap_or(current.nonce)
        } else {
            current.nonce
        };

        let mut entries = self.lock_swept()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.address == *address)
            .ok_or(NonceError::UnknownAccount(*address))?;
        if entry.state != NonceState::Signed {
            // Consumed by a settlement that finished while we were away.
            return Ok(());
        }
        entry.nonce = fresh;
        entry.state = NonceState::Available;
        entry.reserved_at = None;
        self.persist(&entries)?;
        info!(address = %address, "signed nonce cancelled");
        Ok(())
    }

    // -- replenishment -----------------------------------------------------

    /// Create nonce accounts until the pool holds `target_size` live ones.
    /// Returns how many were created; fewer than needed is a normal
    /// outcome when the ledger is throttling us.
    pub async fn replenish_pool(&self, payer: &LedgerKeypair) -> Result<usize, NonceError> {
        if payer.pubkey() != self.authority {
            return Err(NonceError::AuthorityMismatch(payer.pubkey()));
        }

        let _replenishing = self.replenishing.lock().await;
        let needed = {
            let mut entries = self.lock_swept()?;
            let before = entries.len();
            entries.retain(|e| e.state != NonceState::Consumed);
            if entries.len() != before {
                self.persist(&entries)?;
            }
            self.config.target_size.saturating_sub(entries.len())
        };
        if needed == 0 {
            return Ok(0);
        }

        let rent = match with_timeout(
            self.request_timeout(),
            self.ledger.minimum_balance_for_rent_exemption(NONCE_ACCOUNT_LENGTH),
        )
        .await
        {
            Ok(rent) => rent,
            Err(e) => {
                warn!(error = %e, "rent query failed, using known minimum");
                NONCE_ACCOUNT_RENT_EXEMPT_LAMPORTS
            }
        };

        let delay = Duration::from_millis(self.config.creation_delay_ms);
        let mut created = 0;
        let mut last_error = None;
        for i in 0..needed {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.create_account(payer, rent).await {
                    Ok(entry) => {
                        let mut entries = self.entries.lock();
                        entries.push(entry);
                        self.persist(&entries)?;
                        created += 1;
                        break;
                    }
                    Err(e) if e.is_retryable() && attempt < self.config.creation_max_retries => {
                        warn!(attempt, error = %e, "nonce account creation failed, retrying");
                        tokio::time::sleep(delay * attempt).await;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "giving up on nonce account");
                        last_error = Some(e);
                        break;
                    }
                }
            }
        }

        info!(created, needed, "nonce pool replenished");
        match last_error {
            Some(e) if created == 0 => Err(e),
            _ => Ok(created),
        }
    }

    async fn create_account(
        &self,
        payer: &LedgerKeypair,
        rent: u64,
    ) -> Result<NonceEntry, NonceError> {
        let limit = self.request_timeout();
        let account = LedgerKeypair::generate();
        let blockhash = with_timeout(limit, self.ledger.get_latest_blockhash()).await?;
        let tx = create_nonce_account_transaction(payer, &account, rent, blockhash)?;
        with_timeout(limit, self.ledger.send_transaction(&tx)).await?;

        let state = with_timeout(limit, self.ledger.get_nonce_account(&account.pubkey()))
            .await?
            .ok_or_else(|| {
                LedgerError::ExecutionFailed("nonce account not initialized".into())
            })?;
        debug!(address = %account.pubkey(), "nonce account created");
        Ok(NonceEntry {
            address: account.pubkey(),
            nonce: state.nonce,
            authority: state.authority,
            state: NonceState::Available,
            reserved_at: None,
        })
    }
}
