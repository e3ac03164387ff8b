//! Supply conservation check.
//!
//! ```text
//! Σ(balance + locked) == Σ(deposits) − Σ(withdrawals) − Σ(fees)
//! ```
//!
//! Internal movements (locks, unlocks, releases) never change either side.
//! A mismatch means a ledger operation leaked or minted value.

use openescrow_store::SupplyTotals;
use openescrow_types::{EscrowError, Result, Wallet};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of a successful conservation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyReport {
    /// Σ(balance + locked) over all wallets.
    pub actual: Decimal,
    /// deposits − withdrawals − fees.
    pub expected: Decimal,
    pub totals: SupplyTotals,
    pub wallets: usize,
}

/// Delta for value entering the system.
#[must_use]
pub fn deposit_delta(amount: Decimal) -> SupplyTotals {
    SupplyTotals {
        deposited: amount,
        ..SupplyTotals::default()
    }
}

/// Delta for value leaving through a withdrawal. Negative undoes one.
#[must_use]
pub fn withdrawal_delta(amount: Decimal) -> SupplyTotals {
    SupplyTotals {
        withdrawn: amount,
        ..SupplyTotals::default()
    }
}

/// Delta for value kept by the platform. Negative refunds one.
#[must_use]
pub fn fee_delta(amount: Decimal) -> SupplyTotals {
    SupplyTotals {
        fees: amount,
        ..SupplyTotals::default()
    }
}

/// Compare live wallet holdings against the recorded external flows.
///
/// # Errors
/// [`EscrowError::SupplyInvariantViolation`] if they differ or any wallet
/// carries a negative balance.
pub fn check(totals: SupplyTotals, wallets: &[Wallet]) -> Result<SupplyReport> {
    if let Some(wallet) = wallets
        .iter()
        .find(|w| w.balance < Decimal::ZERO || w.locked_balance < Decimal::ZERO)
    {
        return Err(EscrowError::SupplyInvariantViolation {
            reason: format!(
                "wallet {} negative: balance={}, locked={}",
                wallet.user_id, wallet.balance, wallet.locked_balance
            ),
        });
    }

    let actual: Decimal = wallets.iter().map(Wallet::total).sum();
    let expected = totals.expected_holdings();
    if actual != expected {
        return Err(EscrowError::SupplyInvariantViolation {
            reason: format!(
                "actual holdings {actual} != expected {expected} \
                 (deposits={}, withdrawals={}, fees={})",
                totals.deposited, totals.withdrawn, totals.fees
            ),
        });
    }

    Ok(SupplyReport {
        actual,
        expected,
        totals,
        wallets: wallets.len(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use openescrow_types::UserId;

    use super::*;

    fn wallet(balance: i64, locked: i64) -> Wallet {
        let mut w = Wallet::new(UserId::new(), Utc::now());
        w.balance = Decimal::new(balance, 0);
        w.locked_balance = Decimal::new(locked, 0);
        w
    }

    #[test]
    fn empty_system_conserves() {
        let report = check(SupplyTotals::default(), &[]).unwrap();
        assert_eq!(report.actual, Decimal::ZERO);
    }

    #[test]
    fn holdings_match_flows() {
        let totals = SupplyTotals {
            deposited: Decimal::new(1000, 0),
            withdrawn: Decimal::new(300, 0),
            fees: Decimal::new(10, 0),
        };
        let report = check(totals, &[wallet(500, 100), wallet(90, 0)]).unwrap();
        assert_eq!(report.expected, Decimal::new(690, 0));
        assert_eq!(report.wallets, 2);
    }

    #[test]
    fn minted_value_detected() {
        let totals = deposit_delta(Decimal::new(100, 0));
        let err = check(totals, &[wallet(101, 0)]).unwrap_err();
        assert!(matches!(err, EscrowError::SupplyInvariantViolation { .. }));
    }

    #[test]
    fn negative_wallet_detected() {
        let err = check(SupplyTotals::default(), &[wallet(5, -5)]).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }
}
