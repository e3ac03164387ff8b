//! Wallet ledger.
//!
//! Every mutation runs inside one store transaction and appends a log row
//! per touched wallet, so either the full operation succeeds or nothing
//! changes. The `*_in` forms take the caller's [`Tx`] so order and dispute
//! flows can compose several ledger and offer-book mutations atomically.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use openescrow_store::{Store, Tx, chain};
use openescrow_types::{
    Clock, EscrowError, OfferId, OrderId, Result, Transaction, TransactionId, TransactionKind,
    TransactionStatus, UserId, Wallet, checked_add, constants, validate_amount,
};
use rust_decimal::Decimal;
use tracing::{debug, error, info};

use crate::supply::{self, SupplyReport};

/// Context attached to a log row.
#[derive(Debug, Clone, Default)]
pub struct Memo {
    pub order_id: Option<OrderId>,
    pub offer_id: Option<OfferId>,
    /// External dedupe reference. Claimed by [`Ledger::credit_in`].
    pub reference: Option<String>,
    pub description: String,
    pub pending: bool,
}

impl Memo {
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    #[must_use]
    pub fn offer(mut self, offer_id: OfferId) -> Self {
        self.offer_id = Some(offer_id);
        self
    }

    #[must_use]
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Record the row as `pending` until [`Ledger::complete_transaction`].
    #[must_use]
    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }
}

/// The ledger service.
pub struct Ledger {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    #[must_use]
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // -----------------------------------------------------------------
    // Wallets
    // -----------------------------------------------------------------

    /// Create the user's wallet, or return the existing one.
    pub fn create_wallet(&self, user: UserId) -> Result<Wallet> {
        self.store
            .transaction(|tx| Ok(self.create_wallet_in(tx, user)))
    }

    pub fn create_wallet_in(&self, tx: &mut Tx<'_>, user: UserId) -> Wallet {
        if let Some(wallet) = tx.get::<Wallet>(user) {
            return wallet;
        }
        let wallet = Wallet::new(user, self.clock.now());
        tx.put(wallet.clone());
        debug!(user = %user, "wallet created");
        wallet
    }

    pub fn wallet(&self, user: UserId) -> Result<Wallet> {
        self.store
            .get::<Wallet>(user)?
            .ok_or_else(|| EscrowError::WalletNotFound(user.to_string()))
    }

    pub fn wallet_in(tx: &mut Tx<'_>, user: UserId) -> Result<Wallet> {
        tx.require::<Wallet>(user, || EscrowError::WalletNotFound(user.to_string()))
    }

    /// The user's log rows, newest first.
    pub fn history(&self, user: UserId) -> Result<Vec<Transaction>> {
        let mut rows: Vec<Transaction> = self
            .store
            .log()?
            .into_iter()
            .filter(|row| row.user_id == user)
            .collect();
        rows.reverse();
        Ok(rows)
    }

    pub fn transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.store
            .get::<Transaction>(id)?
            .ok_or_else(|| EscrowError::TransactionNotFound(id.to_string()))
    }

    // -----------------------------------------------------------------
    // External flows
    // -----------------------------------------------------------------

    /// Credit spendable balance from outside the system.
    ///
    /// # Errors
    /// `DuplicateTransaction` if `memo.reference` was already consumed.
    pub fn credit(&self, user: UserId, amount: Decimal, memo: Memo) -> Result<Transaction> {
        let row = self
            .store
            .transaction(|tx| self.credit_in(tx, user, amount, memo.clone()))?;
        info!(user = %user, amount = %amount, reference = ?row.reference, "credit committed");
        Ok(row)
    }

    pub fn credit_in(
        &self,
        tx: &mut Tx<'_>,
        user: UserId,
        amount: Decimal,
        memo: Memo,
    ) -> Result<Transaction> {
        validate_amount(amount, constants::CRYPTO_PRECISION, "credit amount")?;
        if let Some(reference) = &memo.reference {
            tx.claim_reference(reference)?;
        }
        let before = self.create_wallet_in(tx, user);
        let mut after = before.clone();
        after.balance = checked_add(after.balance, amount, "wallet balance")?;
        after.total_deposited = checked_add(after.total_deposited, amount, "total deposited")?;
        tx.record_supply(supply::deposit_delta(amount));
        Ok(self.post(tx, &before, after, TransactionKind::Deposit, amount, memo))
    }

    /// Debit spendable balance to outside the system.
    ///
    /// # Errors
    /// `InsufficientBalance` if `balance < amount`.
    pub fn debit(&self, user: UserId, amount: Decimal, memo: Memo) -> Result<Transaction> {
        let row = self
            .store
            .transaction(|tx| self.debit_in(tx, user, amount, memo.clone()))?;
        info!(user = %user, amount = %amount, status = %row.status, "debit committed");
        Ok(row)
    }

    pub fn debit_in(
        &self,
        tx: &mut Tx<'_>,
        user: UserId,
        amount: Decimal,
        memo: Memo,
    ) -> Result<Transaction> {
        validate_amount(amount, constants::CRYPTO_PRECISION, "debit amount")?;
        let before = Self::wallet_in(tx, user)?;
        Self::ensure_spendable(&before, amount)?;
        let mut after = before.clone();
        after.balance -= amount;
        after.total_withdrawn += amount;
        tx.record_supply(supply::withdrawal_delta(amount));
        Ok(self.post(tx, &before, after, TransactionKind::Withdrawal, amount, memo))
    }

    /// Charge a platform fee from spendable balance.
    pub fn charge_fee(&self, user: UserId, amount: Decimal, memo: Memo) -> Result<Transaction> {
        self.store
            .transaction(|tx| self.charge_fee_in(tx, user, amount, memo.clone()))
    }

    pub fn charge_fee_in(
        &self,
        tx: &mut Tx<'_>,
        user: UserId,
        amount: Decimal,
        memo: Memo,
    ) -> Result<Transaction> {
        validate_amount(amount, constants::CRYPTO_PRECISION, "fee amount")?;
        let before = Self::wallet_in(tx, user)?;
        Self::ensure_spendable(&before, amount)?;
        let mut after = before.clone();
        after.balance -= amount;
        after.total_fees += amount;
        tx.record_supply(supply::fee_delta(amount));
        Ok(self.post(tx, &before, after, TransactionKind::Fee, amount, memo))
    }

    /// Settle a pending row. A failed withdrawal or fee is re-credited
    /// through a `withdrawal_reversal` row.
    ///
    /// # Errors
    /// `TransactionNotFound`, or `IllegalTransition` unless the row is pending.
    pub fn complete_transaction(&self, id: TransactionId, success: bool) -> Result<Transaction> {
        let row = self
            .store
            .transaction(|tx| self.complete_transaction_in(tx, id, success))?;
        info!(tx_id = %id, status = %row.status, "transaction settled");
        Ok(row)
    }

    pub fn complete_transaction_in(
        &self,
        tx: &mut Tx<'_>,
        id: TransactionId,
        success: bool,
    ) -> Result<Transaction> {
        let mut row = tx.require::<Transaction>(id, || {
            EscrowError::TransactionNotFound(id.to_string())
        })?;
        let target = if success {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        };
        if !row.status.can_transition_to(target) {
            return Err(EscrowError::illegal(
                "transaction",
                row.status,
                if success { "confirm" } else { "fail" },
            ));
        }
        row.status = target;
        tx.put(row.clone());

        if !success && matches!(row.kind, TransactionKind::Withdrawal | TransactionKind::Fee) {
            let before = Self::wallet_in(tx, row.user_id)?;
            let mut after = before.clone();
            after.balance += row.amount;
            if row.kind == TransactionKind::Withdrawal {
                after.total_withdrawn -= row.amount;
                tx.record_supply(supply::withdrawal_delta(-row.amount));
            } else {
                after.total_fees -= row.amount;
                tx.record_supply(supply::fee_delta(-row.amount));
            }
            let memo = Memo {
                order_id: row.order_id,
                offer_id: row.offer_id,
                reference: row.reference.clone(),
                description: format!("reversal of {}", row.id),
                pending: false,
            };
            self.post(
                tx,
                &before,
                after,
                TransactionKind::WithdrawalReversal,
                row.amount,
                memo,
            );
        }
        Ok(row)
    }

    // -----------------------------------------------------------------
    // Escrow movements (internal, supply-neutral)
    // -----------------------------------------------------------------

    /// Move `amount` from spendable to locked.
    pub fn lock(&self, user: UserId, amount: Decimal, memo: Memo) -> Result<Transaction> {
        self.store
            .transaction(|tx| self.lock_in(tx, user, amount, memo.clone()))
    }

    pub fn lock_in(
        &self,
        tx: &mut Tx<'_>,
        user: UserId,
        amount: Decimal,
        memo: Memo,
    ) -> Result<Transaction> {
        validate_amount(amount, constants::CRYPTO_PRECISION, "lock amount")?;
        let before = Self::wallet_in(tx, user)?;
        Self::ensure_spendable(&before, amount)?;
        let mut after = before.clone();
        after.balance -= amount;
        after.locked_balance += amount;
        Ok(self.post(tx, &before, after, TransactionKind::EscrowLock, amount, memo))
    }

    /// Move `amount` from locked back to spendable.
    ///
    /// # Errors
    /// `EscrowNotLocked` if `locked_balance < amount`.
    pub fn unlock(&self, user: UserId, amount: Decimal, memo: Memo) -> Result<Transaction> {
        self.store
            .transaction(|tx| self.unlock_in(tx, user, amount, memo.clone()))
    }

    pub fn unlock_in(
        &self,
        tx: &mut Tx<'_>,
        user: UserId,
        amount: Decimal,
        memo: Memo,
    ) -> Result<Transaction> {
        validate_amount(amount, constants::CRYPTO_PRECISION, "unlock amount")?;
        let before = Self::wallet_in(tx, user)?;
        Self::ensure_locked(&before, amount)?;
        let mut after = before.clone();
        after.locked_balance -= amount;
        after.balance += amount;
        Ok(self.post(tx, &before, after, TransactionKind::EscrowUnlock, amount, memo))
    }

    /// Move `amount` from `from`'s locked balance to `to`'s spendable balance.
    pub fn release(
        &self,
        from: UserId,
        to: UserId,
        amount: Decimal,
        memo: Memo,
    ) -> Result<(Transaction, Transaction)> {
        self.store
            .transaction(|tx| self.release_in(tx, from, to, amount, memo.clone()))
    }

    pub fn release_in(
        &self,
        tx: &mut Tx<'_>,
        from: UserId,
        to: UserId,
        amount: Decimal,
        memo: Memo,
    ) -> Result<(Transaction, Transaction)> {
        validate_amount(amount, constants::CRYPTO_PRECISION, "release amount")?;
        if from == to {
            return Err(EscrowError::InvalidRequest {
                reason: "release source and destination are the same wallet".to_string(),
            });
        }
        let src_before = Self::wallet_in(tx, from)?;
        Self::ensure_locked(&src_before, amount)?;
        let mut src_after = src_before.clone();
        src_after.locked_balance -= amount;
        src_after.total_sent += amount;
        let debit = self.post(
            tx,
            &src_before,
            src_after,
            TransactionKind::TradeDebit,
            amount,
            memo.clone(),
        );

        let dst_before = self.create_wallet_in(tx, to);
        let mut dst_after = dst_before.clone();
        dst_after.balance = checked_add(dst_after.balance, amount, "wallet balance")?;
        dst_after.total_received = checked_add(dst_after.total_received, amount, "total received")?;
        let credit = self.post(
            tx,
            &dst_before,
            dst_after,
            TransactionKind::TradeCredit,
            amount,
            memo,
        );
        Ok((debit, credit))
    }

    // -----------------------------------------------------------------
    // Audits
    // -----------------------------------------------------------------

    /// Check `Σ(balance + locked) == deposits − withdrawals − fees` over
    /// one consistent snapshot.
    pub fn verify_conservation(&self) -> Result<SupplyReport> {
        let (totals, wallets) = self
            .store
            .transaction(|tx| Ok((tx.supply_totals(), tx.scan::<Wallet>())))?;
        supply::check(totals, &wallets).inspect_err(|err| {
            error!(error = %err, "supply conservation violated");
        })
    }

    /// Recompute the log hash chain. Returns the number of rows checked.
    pub fn verify_log_chain(&self) -> Result<usize> {
        let log = self.store.log()?;
        chain::verify_chain(&log)?;
        Ok(log.len())
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn ensure_spendable(wallet: &Wallet, amount: Decimal) -> Result<()> {
        if wallet.balance < amount {
            return Err(EscrowError::InsufficientBalance {
                needed: amount,
                available: wallet.balance,
            });
        }
        Ok(())
    }

    fn ensure_locked(wallet: &Wallet, amount: Decimal) -> Result<()> {
        if wallet.locked_balance < amount {
            return Err(EscrowError::EscrowNotLocked {
                reason: format!(
                    "wallet {} has {} locked, {amount} required",
                    wallet.user_id, wallet.locked_balance
                ),
            });
        }
        Ok(())
    }

    /// Stage the wallet update and its log row.
    fn post(
        &self,
        tx: &mut Tx<'_>,
        before: &Wallet,
        mut after: Wallet,
        kind: TransactionKind,
        amount: Decimal,
        memo: Memo,
    ) -> Transaction {
        let now = self.clock.now();
        after.updated_at = now;
        let row = log_row(before, &after, kind, amount, memo, now);
        tx.put(after);
        tx.append_log(row.clone());
        debug!(user = %row.user_id, kind = %kind, amount = %amount, "ledger row staged");
        row
    }
}

fn log_row(
    before: &Wallet,
    after: &Wallet,
    kind: TransactionKind,
    amount: Decimal,
    memo: Memo,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction {
        id: TransactionId::new(),
        user_id: before.user_id,
        kind,
        amount,
        balance_before: before.balance,
        balance_after: after.balance,
        locked_before: before.locked_balance,
        locked_after: after.locked_balance,
        status: if memo.pending {
            TransactionStatus::Pending
        } else {
            TransactionStatus::Success
        },
        order_id: memo.order_id,
        offer_id: memo.offer_id,
        reference: memo.reference,
        description: memo.description,
        sequence: 0,
        prev_hash: String::new(),
        entry_hash: String::new(),
        created_at: now,
    }
}
