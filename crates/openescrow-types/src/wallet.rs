//! Wallet and transaction-log types.
//!
//! Every user has one wallet with a spendable `balance` and a
//! `locked_balance` reserved by escrow locks. Wallets are mutated only by
//! the ledger, and every mutation appends a [`Transaction`] row.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{OfferId, OrderId, TransactionId, UserId};

/// A user's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    /// Spendable balance.
    pub balance: Decimal,
    /// Reserved by escrow locks; not spendable.
    pub locked_balance: Decimal,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    /// Received as the buyer side of completed trades.
    pub total_received: Decimal,
    /// Sent as the seller side of completed trades.
    pub total_sent: Decimal,
    pub total_fees: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            locked_balance: Decimal::ZERO,
            total_deposited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            total_received: Decimal::ZERO,
            total_sent: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total holdings (balance + locked).
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.balance + self.locked_balance
    }
}

/// What a log row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// External deposit confirmed by the payment gateway.
    Deposit,
    /// External withdrawal (pending until the gateway reports back).
    Withdrawal,
    /// Re-credit of a failed withdrawal.
    WithdrawalReversal,
    /// Platform fee.
    Fee,
    /// Spendable → locked.
    EscrowLock,
    /// Locked → spendable.
    EscrowUnlock,
    /// Seller's locked funds leaving on release.
    TradeDebit,
    /// Buyer's balance receiving released funds.
    TradeCredit,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
            Self::WithdrawalReversal => "WITHDRAWAL_REVERSAL",
            Self::Fee => "FEE",
            Self::EscrowLock => "ESCROW_LOCK",
            Self::EscrowUnlock => "ESCROW_UNLOCK",
            Self::TradeDebit => "TRADE_DEBIT",
            Self::TradeCredit => "TRADE_CREDIT",
        };
        f.write_str(s)
    }
}

/// Settlement status of a log row.
///
/// Transitions are one-way: `Pending → Success | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!((self, target), (Self::Pending, Self::Success | Self::Failed))
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// An append-only ledger log row.
///
/// `sequence`, `prev_hash` and `entry_hash` are assigned by the store when
/// the row is committed; only `status` may change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub locked_before: Decimal,
    pub locked_after: Decimal,
    pub status: TransactionStatus,
    pub order_id: Option<OrderId>,
    pub offer_id: Option<OfferId>,
    /// External reference (gateway id) for externally sourced rows.
    pub reference: Option<String>,
    pub description: String,
    pub sequence: u64,
    pub prev_hash: String,
    pub entry_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Returns `true` if the row can still be settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_is_empty() {
        let wallet = Wallet::new(UserId::new(), Utc::now());
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.locked_balance, Decimal::ZERO);
        assert_eq!(wallet.total(), Decimal::ZERO);
    }

    #[test]
    fn wallet_total() {
        let mut wallet = Wallet::new(UserId::new(), Utc::now());
        wallet.balance = Decimal::new(100, 0);
        wallet.locked_balance = Decimal::new(50, 0);
        assert_eq!(wallet.total(), Decimal::new(150, 0));
    }

    #[test]
    fn status_transitions() {
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Success));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Failed));
        assert!(!TransactionStatus::Success.can_transition_to(TransactionStatus::Failed));
        assert!(!TransactionStatus::Failed.can_transition_to(TransactionStatus::Pending));
    }

    #[test]
    fn wallet_serializes_decimals_as_strings() {
        let mut wallet = Wallet::new(UserId::new(), Utc::now());
        wallet.balance = Decimal::new(12345, 2);
        let json = serde_json::to_value(&wallet).unwrap();
        assert_eq!(json["balance"], "123.45");
    }
}
