//! Payment gateway adapter.
//!
//! The gateway itself is outside the engine. Deposits arrive as verified
//! webhook results and are deduplicated by gateway reference; withdrawals
//! leave as pending debits that the gateway later confirms or fails.

use std::sync::Arc;

use openescrow_ledger::{Ledger, Memo};
use openescrow_types::{
    EscrowError, KycAction, Result, Transaction, TransactionId, TransactionKind, UserId,
    checked_add, constants, validate_amount,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::services::Services;

/// A gateway's verification of an inbound transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositVerification {
    pub reference: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub success: bool,
}

/// Transfer instruction handed to the gateway after the debit is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub transaction_id: TransactionId,
    pub fee_transaction_id: Option<TransactionId>,
    pub user_id: UserId,
    pub amount: Decimal,
    pub fee: Decimal,
    pub destination: String,
    /// Shared by the withdrawal and fee rows.
    pub reference: String,
}

pub struct PaymentService {
    svc: Arc<Services>,
}

impl PaymentService {
    #[must_use]
    pub fn new(svc: Arc<Services>) -> Self {
        Self { svc }
    }

    /// Credit a verified deposit. Failed verifications credit nothing.
    ///
    /// # Errors
    /// `DuplicateTransaction` when the reference was already credited.
    pub fn confirm_deposit(&self, verification: &DepositVerification) -> Result<Option<Transaction>> {
        if !verification.success {
            warn!(
                reference = %verification.reference,
                user = %verification.user_id,
                "deposit verification unsuccessful, nothing credited"
            );
            return Ok(None);
        }
        if verification.reference.trim().is_empty() {
            return Err(EscrowError::InvalidRequest {
                reason: "deposit reference must not be empty".to_string(),
            });
        }
        let row = self.svc.ledger.credit(
            verification.user_id,
            verification.amount,
            Memo::new("gateway deposit").reference(verification.reference.clone()),
        )?;
        Ok(Some(row))
    }

    /// Debit `amount` (plus the configured fee) as pending and return the
    /// instruction for the gateway.
    pub fn request_withdrawal(
        &self,
        user: UserId,
        amount: Decimal,
        destination: &str,
    ) -> Result<WithdrawalRequest> {
        if destination.trim().is_empty() {
            return Err(EscrowError::InvalidRequest {
                reason: "withdrawal destination must not be empty".to_string(),
            });
        }
        validate_amount(amount, constants::CRYPTO_PRECISION, "withdrawal amount")?;
        let fee = self.svc.config.payments.withdrawal_fee;
        let total = checked_add(amount, fee, "withdrawal total")?;
        let request = self.svc.store.transaction(|tx| {
            self.svc
                .kyc
                .validate_action_in(tx, user, KycAction::Withdraw, amount)?;
            let wallet = Ledger::wallet_in(tx, user)?;
            if wallet.balance < total {
                return Err(EscrowError::InsufficientBalance {
                    needed: total,
                    available: wallet.balance,
                });
            }

            let reference = format!("wd-{}", TransactionId::new().0);
            let memo = Memo::new(format!("withdrawal to {destination}"))
                .reference(reference.clone())
                .pending();
            let row = self.svc.ledger.debit_in(tx, user, amount, memo)?;
            let fee_row = if fee > Decimal::ZERO {
                let memo = Memo::new("withdrawal fee").reference(reference.clone()).pending();
                Some(self.svc.ledger.charge_fee_in(tx, user, fee, memo)?)
            } else {
                None
            };
            Ok(WithdrawalRequest {
                transaction_id: row.id,
                fee_transaction_id: fee_row.map(|r| r.id),
                user_id: user,
                amount,
                fee,
                destination: destination.to_string(),
                reference,
            })
        })?;

        info!(
            user = %user,
            amount = %amount,
            fee = %fee,
            reference = %request.reference,
            "withdrawal requested"
        );
        Ok(request)
    }

    /// Settle a withdrawal and its fee with the gateway's outcome. A failure
    /// re-credits both.
    pub fn complete_withdrawal(&self, transaction_id: TransactionId, success: bool) -> Result<Transaction> {
        let row = self.svc.store.transaction(|tx| {
            let row = tx.require::<Transaction>(transaction_id, || {
                EscrowError::TransactionNotFound(transaction_id.to_string())
            })?;
            if row.kind != TransactionKind::Withdrawal {
                return Err(EscrowError::InvalidRequest {
                    reason: format!("{transaction_id} is a {}, not a withdrawal", row.kind),
                });
            }
            let settled = self
                .svc
                .ledger
                .complete_transaction_in(tx, transaction_id, success)?;

            let fees: Vec<TransactionId> = tx
                .scan::<Transaction>()
                .into_iter()
                .filter(|r| {
                    r.kind == TransactionKind::Fee
                        && r.is_pending()
                        && r.user_id == row.user_id
                        && r.reference.is_some()
                        && r.reference == row.reference
                })
                .map(|r| r.id)
                .collect();
            for fee in fees {
                self.svc.ledger.complete_transaction_in(tx, fee, success)?;
            }
            Ok(settled)
        })?;

        if success {
            info!(tx_id = %transaction_id, user = %row.user_id, amount = %row.amount, "withdrawal completed");
        } else {
            warn!(tx_id = %transaction_id, user = %row.user_id, amount = %row.amount, "withdrawal failed, funds re-credited");
        }
        Ok(row)
    }
}
