//! Randomized concurrent transfers: every committed transaction preserves
//! the total, and no wallet ever goes negative.

use std::sync::Arc;

use chrono::Utc;
use openescrow_store::{Store, chain};
use openescrow_types::{
    EscrowError, Transaction, TransactionId, TransactionKind, TransactionStatus, UserId, Wallet,
};
use rand::Rng;
use rust_decimal::Decimal;

fn transfer_row(user: UserId, amount: Decimal, before: Decimal) -> Transaction {
    Transaction {
        id: TransactionId::new(),
        user_id: user,
        kind: TransactionKind::TradeCredit,
        amount,
        balance_before: before,
        balance_after: before + amount,
        locked_before: Decimal::ZERO,
        locked_after: Decimal::ZERO,
        status: TransactionStatus::Success,
        order_id: None,
        offer_id: None,
        reference: None,
        description: "transfer".into(),
        sequence: 0,
        prev_hash: String::new(),
        entry_hash: String::new(),
        created_at: Utc::now(),
    }
}

#[test]
fn random_transfers_conserve_total() {
    let store = Arc::new(Store::new(10_000));
    let users: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
    store
        .transaction(|tx| {
            for user in &users {
                let mut wallet = Wallet::new(*user, Utc::now());
                wallet.balance = Decimal::new(100, 0);
                tx.put(wallet);
            }
            Ok(())
        })
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let users = users.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..100 {
                    let from = users[rng.gen_range(0..users.len())];
                    let to = users[rng.gen_range(0..users.len())];
                    let amount = Decimal::new(rng.gen_range(1..=2500), 2);
                    if from == to {
                        continue;
                    }
                    let result = store.transaction(|tx| {
                        let mut src = tx.get::<Wallet>(from).unwrap();
                        let mut dst = tx.get::<Wallet>(to).unwrap();
                        if src.balance < amount {
                            return Err(EscrowError::InsufficientBalance {
                                needed: amount,
                                available: src.balance,
                            });
                        }
                        let dst_before = dst.balance;
                        src.balance -= amount;
                        dst.balance += amount;
                        tx.put(src);
                        tx.put(dst);
                        tx.append_log(transfer_row(to, amount, dst_before));
                        Ok(())
                    });
                    match result {
                        Ok(()) | Err(EscrowError::InsufficientBalance { .. }) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let wallets = store.scan::<Wallet>().unwrap();
    let total: Decimal = wallets.iter().map(Wallet::total).sum();
    assert_eq!(total, Decimal::new(400, 0));
    assert!(wallets.iter().all(|w| w.balance >= Decimal::ZERO));

    let log = store.log().unwrap();
    chain::verify_chain(&log).unwrap();
}
