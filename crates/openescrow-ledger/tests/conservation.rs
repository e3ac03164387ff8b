//! Randomized ledger sequences: conservation and non-negativity hold after
//! every operation, whether it succeeded or was rejected.

use std::sync::Arc;

use openescrow_ledger::{Ledger, Memo};
use openescrow_store::Store;
use openescrow_types::{EscrowError, ManualClock, UserId};
use rand::Rng;
use rust_decimal::Decimal;

fn random_amount(rng: &mut impl Rng) -> Decimal {
    Decimal::new(rng.gen_range(1..=50_000), 2)
}

#[test]
fn random_operations_conserve_supply() {
    let ledger = Ledger::new(Arc::new(Store::default()), Arc::new(ManualClock::default()));
    let users: Vec<UserId> = (0..5).map(|_| UserId::new()).collect();
    for user in &users {
        ledger
            .credit(*user, Decimal::new(1000, 0), Memo::new("seed"))
            .unwrap();
    }

    let mut rng = rand::thread_rng();
    let mut pending = Vec::new();
    for step in 0..500 {
        let user = users[rng.gen_range(0..users.len())];
        let other = users[rng.gen_range(0..users.len())];
        let amount = random_amount(&mut rng);
        let result = match rng.gen_range(0..7) {
            0 => ledger
                .credit(user, amount, Memo::new("dep").reference(format!("ref-{step}")))
                .map(drop),
            1 => ledger.lock(user, amount, Memo::new("lock")).map(drop),
            2 => ledger.unlock(user, amount, Memo::new("unlock")).map(drop),
            3 => ledger.release(user, other, amount, Memo::new("release")).map(drop),
            4 => ledger.charge_fee(user, amount / Decimal::new(100, 0), Memo::new("fee")).map(drop),
            5 => ledger
                .debit(user, amount, Memo::new("withdraw").pending())
                .map(|row| pending.push(row.id)),
            _ => match pending.pop() {
                Some(id) => ledger.complete_transaction(id, rng.gen_bool(0.5)).map(drop),
                None => Ok(()),
            },
        };
        match result {
            Ok(())
            | Err(
                EscrowError::InsufficientBalance { .. }
                | EscrowError::EscrowNotLocked { .. }
                | EscrowError::InvalidRequest { .. }
                | EscrowError::InvalidAmount { .. },
            ) => {}
            Err(other) => panic!("step {step}: unexpected error {other}"),
        }
        ledger.verify_conservation().unwrap();
    }

    ledger.verify_log_chain().unwrap();
}

#[test]
fn replayed_reference_never_double_credits() {
    let ledger = Ledger::new(Arc::new(Store::default()), Arc::new(ManualClock::default()));
    let user = UserId::new();
    for _ in 0..5 {
        let _ = ledger.credit(user, Decimal::new(50, 0), Memo::new("dep").reference("webhook-1"));
    }
    assert_eq!(ledger.wallet(user).unwrap().balance, Decimal::new(50, 0));
    let report = ledger.verify_conservation().unwrap();
    assert_eq!(report.totals.deposited, Decimal::new(50, 0));
}
