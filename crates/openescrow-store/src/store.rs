//! The transactional store.
//!
//! ## Commit protocol
//!
//! 1. Run the closure under a shared lock against committed state, staging
//!    writes and recording the version of every row read.
//! 2. Release the shared lock, take the exclusive commit lock.
//! 3. Re-validate every recorded version and claimed reference. On any
//!    mismatch the staged work is discarded and the closure re-runs.
//! 4. Otherwise apply writes, chain the appended log rows, add the supply
//!    deltas, and record the claimed references.
//!
//! Closures must not call back into the store: compose through the
//! `Tx` they are handed.

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use openescrow_types::{EscrowError, Result, StoreConfig, Transaction, TransactionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::{self, GENESIS_HASH};
use crate::table::{Record, StagedTables, Tables};

/// Running totals of value entering and leaving the system.
///
/// The conservation invariant is
/// `Σ(balance + locked) == deposited − withdrawn − fees`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyTotals {
    pub deposited: Decimal,
    pub withdrawn: Decimal,
    pub fees: Decimal,
}

impl SupplyTotals {
    /// Value that should currently sit in wallets.
    #[must_use]
    pub fn expected_holdings(&self) -> Decimal {
        self.deposited - self.withdrawn - self.fees
    }

    fn add(&mut self, delta: &Self) {
        self.deposited += delta.deposited;
        self.withdrawn += delta.withdrawn;
        self.fees += delta.fees;
    }
}

#[derive(Debug)]
struct StoreState {
    tables: Tables,
    log: Vec<TransactionId>,
    last_hash: String,
    references: HashSet<String>,
    supply: SupplyTotals,
    commits: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            tables: Tables::default(),
            log: Vec::new(),
            last_hash: GENESIS_HASH.to_string(),
            references: HashSet::new(),
            supply: SupplyTotals::default(),
            commits: 0,
        }
    }
}

/// Everything a finished closure wants to commit.
struct Pending {
    staged: StagedTables,
    log: Vec<Transaction>,
    references: Vec<String>,
    supply: SupplyTotals,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.staged.is_empty()
            && self.log.is_empty()
            && self.references.is_empty()
            && self.supply == SupplyTotals::default()
    }

    fn is_valid_against(&self, state: &StoreState) -> bool {
        self.staged.is_valid_against(&state.tables)
            && !self.references.iter().any(|r| state.references.contains(r))
    }
}

/// A single transaction attempt.
pub struct Tx<'a> {
    state: &'a StoreState,
    staged: StagedTables,
    log: Vec<Transaction>,
    references: Vec<String>,
    supply: SupplyTotals,
}

impl<'a> Tx<'a> {
    fn new(state: &'a StoreState) -> Self {
        Self {
            state,
            staged: StagedTables::default(),
            log: Vec::new(),
            references: Vec::new(),
            supply: SupplyTotals::default(),
        }
    }

    /// Read a row, seeing this transaction's own writes.
    pub fn get<R: Record>(&mut self, key: R::Key) -> Option<R> {
        R::staged(&mut self.staged).read(R::table(&self.state.tables), key)
    }

    /// Like [`Tx::get`] but maps absence to `missing()`.
    pub fn require<R: Record>(
        &mut self,
        key: R::Key,
        missing: impl FnOnce() -> EscrowError,
    ) -> Result<R> {
        self.get(key).ok_or_else(missing)
    }

    /// Stage an insert or update.
    pub fn put<R: Record>(&mut self, value: R) {
        R::staged(&mut self.staged).write(value.key(), value);
    }

    /// All rows of a table in key order, including staged writes.
    ///
    /// Any concurrent commit to the table invalidates this transaction.
    pub fn scan<R: Record>(&mut self) -> Vec<R> {
        R::staged(&mut self.staged).scan(R::table(&self.state.tables), R::key)
    }

    /// Append a log row. `sequence` and hashes are assigned at commit.
    pub fn append_log(&mut self, row: Transaction) {
        self.log.push(row);
    }

    /// Claim an external dedupe reference for this transaction.
    ///
    /// # Errors
    /// `DuplicateTransaction` if the reference was consumed by an earlier
    /// commit or already claimed in this transaction.
    pub fn claim_reference(&mut self, reference: &str) -> Result<()> {
        if self.state.references.contains(reference)
            || self.references.iter().any(|r| r == reference)
        {
            return Err(EscrowError::DuplicateTransaction {
                reference: reference.to_string(),
            });
        }
        self.references.push(reference.to_string());
        Ok(())
    }

    /// Record value entering or leaving the system.
    pub fn record_supply(&mut self, delta: SupplyTotals) {
        self.supply.add(&delta);
    }

    /// Committed supply totals as of this attempt's snapshot.
    #[must_use]
    pub fn supply_totals(&self) -> SupplyTotals {
        self.state.supply
    }

    fn into_pending(self) -> Pending {
        Pending {
            staged: self.staged,
            log: self.log,
            references: self.references,
            supply: self.supply,
        }
    }
}

/// In-memory transactional store shared by every service.
#[derive(Debug)]
pub struct Store {
    state: RwLock<StoreState>,
    max_attempts: usize,
}

impl Store {
    /// Create an empty store making at most `max_attempts` attempts per
    /// transaction (minimum one).
    #[must_use]
    pub fn new(max_attempts: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            max_attempts: max_attempts.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.max_tx_retries)
    }

    /// Run `f` as one atomic transaction, re-running it on write conflicts.
    ///
    /// An `Err` from `f` aborts with nothing applied.
    ///
    /// # Errors
    /// Whatever `f` returns, or `WriteConflict` once attempts run out.
    pub fn transaction<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Tx<'_>) -> Result<T>,
    {
        for attempt in 1..=self.max_attempts {
            let (value, pending) = {
                let guard = self.read_state()?;
                let mut tx = Tx::new(&guard);
                let value = f(&mut tx)?;
                (value, tx.into_pending())
            };

            if pending.is_empty() {
                return Ok(value);
            }

            let mut state = self.write_state()?;
            if !pending.is_valid_against(&state) {
                debug!(attempt, "store transaction conflicted, retrying");
                continue;
            }
            Self::apply(&mut state, pending);
            return Ok(value);
        }

        warn!(
            attempts = self.max_attempts,
            "store transaction abandoned after repeated conflicts"
        );
        Err(EscrowError::WriteConflict {
            attempts: self.max_attempts,
        })
    }

    fn apply(state: &mut StoreState, pending: Pending) {
        state.commits += 1;
        let commit = state.commits;

        let written = pending.staged.apply(&mut state.tables, commit);

        let appended = pending.log.len();
        for mut row in pending.log {
            row.sequence = state.log.len() as u64 + 1;
            row.prev_hash.clone_from(&state.last_hash);
            row.entry_hash = chain::entry_hash(&row);
            state.last_hash.clone_from(&row.entry_hash);
            state.log.push(row.id);
            state.tables.transactions.upsert(row.id, row, commit);
        }

        state.supply.add(&pending.supply);
        state.references.extend(pending.references);

        debug!(commit, written, appended, "store commit applied");
    }

    /// Committed row by key.
    pub fn get<R: Record>(&self, key: R::Key) -> Result<Option<R>> {
        let state = self.read_state()?;
        Ok(R::table(&state.tables).get(&key).cloned())
    }

    /// All committed rows of a table in key order.
    pub fn scan<R: Record>(&self) -> Result<Vec<R>> {
        let state = self.read_state()?;
        Ok(R::table(&state.tables).values().cloned().collect())
    }

    /// The ledger log in sequence order.
    pub fn log(&self) -> Result<Vec<Transaction>> {
        let state = self.read_state()?;
        Ok(state
            .log
            .iter()
            .filter_map(|id| state.tables.transactions.get(id).cloned())
            .collect())
    }

    pub fn supply_totals(&self) -> Result<SupplyTotals> {
        Ok(self.read_state()?.supply)
    }

    /// Whether an external reference has been consumed.
    pub fn reference_consumed(&self, reference: &str) -> Result<bool> {
        Ok(self.read_state()?.references.contains(reference))
    }

    /// Number of applied commits.
    pub fn commit_count(&self) -> Result<u64> {
        Ok(self.read_state()?.commits)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| EscrowError::Internal("store lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| EscrowError::Internal("store lock poisoned".to_string()))
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(openescrow_types::constants::DEFAULT_MAX_TX_RETRIES)
    }
}
