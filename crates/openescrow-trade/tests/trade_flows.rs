//! End-to-end order lifecycles: every exit settles the escrow exactly once
//! and the ledger stays conserved throughout.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Duration;
use openescrow_ledger::Memo;
use openescrow_market::{MatchCriteria, NewOffer, OfferUpdate};
use openescrow_trade::{
    DepositVerification, Engine, NewOrder, NotificationKind, PriceGuard, RecordingNotifier,
};
use openescrow_types::{
    Actor, Caller, Clock, DisputeStatus, DisputeWinner, EngineConfig, EscrowError, EscrowLock,
    EscrowLockId, EscrowStatus, ErrorBody, KycLevel, ManualClock, Offer, OfferSide, Order, OrderId,
    OrderStatus, TradingPair, TransactionKind, UserId,
};
use rust_decimal::Decimal;

struct Desk {
    engine: Engine,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    admin: Caller,
}

impl Desk {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Engine::new(config, clock.clone(), notifier.clone()).unwrap();
        Self {
            engine,
            clock,
            notifier,
            admin: Caller::admin(UserId::new()),
        }
    }

    fn user(&self, deposit: i64) -> UserId {
        let user = UserId::new();
        self.engine.services().ledger.create_wallet(user).unwrap();
        if deposit > 0 {
            self.deposit(user, deposit, &format!("dep-{user}"));
        }
        user
    }

    fn deposit(&self, user: UserId, amount: i64, reference: &str) {
        self.engine
            .payments()
            .confirm_deposit(&DepositVerification {
                reference: reference.to_string(),
                user_id: user,
                amount: Decimal::new(amount, 0),
                success: true,
            })
            .unwrap();
    }

    fn list(&self, seller: UserId, price: i64, available: i64) -> Offer {
        self.engine
            .services()
            .offers
            .create_offer(
                seller,
                NewOffer {
                    side: OfferSide::Sell,
                    pair: pair(),
                    price: Decimal::new(price, 0),
                    min_limit: Decimal::new(500, 0),
                    max_limit: Decimal::new(20_000, 0),
                    available_amount: Decimal::new(available, 0),
                    payment_methods: vec!["bank_transfer".into()],
                    payment_window_minutes: Some(15),
                    terms: None,
                },
            )
            .unwrap()
    }

    fn take(&self, buyer: UserId, offer: &Offer, fiat: i64) -> Order {
        self.engine
            .orders()
            .create_order(buyer, bank_order(offer, fiat))
            .unwrap()
    }

    fn reprice(&self, seller: UserId, offer: &Offer, price: i64) {
        self.engine
            .services()
            .offers
            .update_offer(
                seller,
                offer.id,
                OfferUpdate {
                    price: Some(dec(price)),
                    ..OfferUpdate::default()
                },
            )
            .unwrap();
    }

    /// Ledger rows that settled `order`'s escrow: refunds plus releases.
    fn settlements(&self, seller: UserId, order: OrderId) -> usize {
        self.engine
            .services()
            .ledger
            .history(seller)
            .unwrap()
            .into_iter()
            .filter(|t| t.order_id == Some(order))
            .filter(|t| matches!(t.kind, TransactionKind::EscrowUnlock | TransactionKind::TradeDebit))
            .count()
    }

    fn balances(&self, user: UserId) -> (Decimal, Decimal) {
        let wallet = self.engine.services().ledger.wallet(user).unwrap();
        (wallet.balance, wallet.locked_balance)
    }

    fn order(&self, id: OrderId) -> Order {
        self.engine.services().store.get::<Order>(id).unwrap().unwrap()
    }

    fn available(&self, offer: &Offer) -> Decimal {
        self.engine
            .services()
            .offers
            .get_offer(offer.id)
            .unwrap()
            .available_amount
    }

    fn assert_conserved(&self) {
        let report = self.engine.services().ledger.verify_conservation().unwrap();
        assert_eq!(report.actual, report.expected);
        self.engine.services().ledger.verify_log_chain().unwrap();
    }
}

fn pair() -> TradingPair {
    TradingPair::new("USDT", "NGN")
}

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

fn bank_order(offer: &Offer, fiat: i64) -> NewOrder {
    NewOrder {
        offer_id: offer.id,
        fiat_amount: dec(fiat),
        payment_method: "bank_transfer".into(),
    }
}

#[test]
fn paid_and_released_order_moves_crypto_to_buyer() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let buyer = desk.user(0);
    let offer = desk.list(seller, 1000, 10);

    let order = desk.take(buyer, &offer, 2000);
    assert_eq!(order.crypto_amount, dec(2));
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(desk.available(&offer), dec(8));
    assert_eq!(desk.balances(seller), (dec(8), dec(2)));
    desk.assert_conserved();

    let paid = desk
        .engine
        .orders()
        .mark_as_paid(buyer, order.id, Some("https://proof.example/1".into()))
        .unwrap();
    assert_eq!(paid.status, OrderStatus::AwaitingRelease);
    assert!(paid.paid_at.is_some());

    let done = desk.engine.orders().release_crypto(seller, order.id).unwrap();
    assert_eq!(done.status, OrderStatus::Completed);
    assert!(!done.escrow_locked);
    assert_eq!(desk.balances(buyer), (dec(2), Decimal::ZERO));
    assert_eq!(desk.balances(seller), (dec(8), Decimal::ZERO));
    desk.assert_conserved();

    let buyer_news = desk.notifier.sent_to(buyer);
    assert!(buyer_news.iter().any(|n| n.kind == NotificationKind::CryptoReleased));
    let stats = desk.engine.services().offers.get_offer(offer.id).unwrap().stats;
    assert_eq!(stats.completed_orders, 1);
}

#[test]
fn unpaid_order_expires_after_deadline_and_buffer() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let buyer = desk.user(0);
    let offer = desk.list(seller, 1000, 10);
    let order = desk.take(buyer, &offer, 3000);

    desk.clock.advance(Duration::minutes(16));
    assert!(desk.engine.orders().expire_order(order.id).unwrap().is_none());
    let late = desk.engine.orders().mark_as_paid(buyer, order.id, None);
    assert_eq!(late.unwrap_err(), EscrowError::OrderExpired(order.id));

    desk.clock.advance(Duration::minutes(2));
    let report = desk.engine.scheduler().sweep_expired_orders().unwrap();
    assert_eq!((report.examined, report.applied), (1, 1));

    let expired = desk.order(order.id);
    assert_eq!(expired.status, OrderStatus::Expired);
    assert_eq!(expired.cancelled_by, Some(Actor::System));
    assert_eq!(desk.balances(seller), (dec(10), Decimal::ZERO));
    assert_eq!(desk.available(&offer), dec(10));
    desk.assert_conserved();

    let again = desk.engine.scheduler().sweep_expired_orders().unwrap();
    assert_eq!(again.examined, 0);
}

#[test]
fn buyer_won_dispute_releases_escrow() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let buyer = desk.user(0);
    let offer = desk.list(seller, 1000, 10);
    let order = desk.take(buyer, &offer, 2000);
    desk.engine.orders().mark_as_paid(buyer, order.id, None).unwrap();

    let disputes = desk.engine.disputes();
    let dispute = disputes
        .open_dispute(buyer, order.id, "paid but seller is silent")
        .unwrap();
    assert_eq!(
        disputes.open_dispute(seller, order.id, "me too").unwrap_err(),
        EscrowError::DisputeAlreadyOpen(order.id)
    );
    assert!(matches!(
        desk.engine.orders().release_crypto(seller, order.id),
        Err(EscrowError::IllegalTransition { .. })
    ));
    disputes
        .add_evidence(buyer, dispute.id, "bank receipt", "https://proof.example/r")
        .unwrap();

    let open = disputes.list_open_disputes(&desk.admin, 1, 10).unwrap();
    assert_eq!(open.total, 1);

    let resolved = disputes
        .resolve_dispute(&desk.admin, dispute.id, DisputeWinner::Buyer, "receipt checks out")
        .unwrap();
    assert_eq!(resolved.status, DisputeStatus::ResolvedBuyer);
    assert_eq!(resolved.evidence.len(), 1);
    assert_eq!(desk.order(order.id).status, OrderStatus::Completed);
    assert_eq!(desk.balances(buyer), (dec(2), Decimal::ZERO));
    assert_eq!(desk.balances(seller), (dec(8), Decimal::ZERO));
    assert_eq!(desk.available(&offer), dec(8));
    desk.assert_conserved();

    assert!(disputes.list_open_disputes(&desk.admin, 1, 10).unwrap().items.is_empty());
}

#[test]
fn seller_won_dispute_refunds_and_restores_the_offer() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let buyer = desk.user(0);
    let offer = desk.list(seller, 1000, 10);
    let order = desk.take(buyer, &offer, 2000);
    desk.engine.orders().mark_as_paid(buyer, order.id, None).unwrap();

    let dispute = desk
        .engine
        .disputes()
        .open_dispute(seller, order.id, "no payment received")
        .unwrap();
    let user_caller = Caller::user(buyer);
    assert!(matches!(
        desk.engine
            .disputes()
            .resolve_dispute(&user_caller, dispute.id, DisputeWinner::Buyer, ""),
        Err(EscrowError::Forbidden { .. })
    ));

    desk.engine
        .disputes()
        .resolve_dispute(&desk.admin, dispute.id, DisputeWinner::Seller, "no funds arrived")
        .unwrap();
    assert_eq!(desk.order(order.id).status, OrderStatus::Completed);
    assert_eq!(desk.balances(seller), (dec(10), Decimal::ZERO));
    assert_eq!(desk.balances(buyer), (Decimal::ZERO, Decimal::ZERO));
    assert_eq!(desk.available(&offer), dec(10));
    desk.assert_conserved();
}

#[test]
fn rejected_transitions_leave_state_untouched() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let buyer = desk.user(0);
    let outsider = desk.user(0);
    let offer = desk.list(seller, 1000, 10);
    let order = desk.take(buyer, &offer, 2000);
    let orders = desk.engine.orders();

    assert!(matches!(
        orders.release_crypto(seller, order.id),
        Err(EscrowError::IllegalTransition { .. })
    ));
    assert!(matches!(
        orders.mark_as_paid(seller, order.id, None),
        Err(EscrowError::Forbidden { .. })
    ));
    assert_eq!(
        orders.mark_as_paid(outsider, order.id, None).unwrap_err(),
        EscrowError::NotParticipant(order.id)
    );
    assert_eq!(
        orders.get_order(&Caller::user(outsider), order.id).unwrap_err(),
        EscrowError::NotParticipant(order.id)
    );

    orders.mark_as_paid(buyer, order.id, None).unwrap();
    assert!(matches!(
        orders.release_crypto(buyer, order.id),
        Err(EscrowError::Forbidden { .. })
    ));
    assert!(matches!(
        orders.cancel_order(buyer, order.id, None),
        Err(EscrowError::Forbidden { .. })
    ));

    let unchanged = desk.order(order.id);
    assert_eq!(unchanged.status, OrderStatus::AwaitingRelease);
    assert!(unchanged.escrow_locked);
    assert_eq!(desk.balances(seller), (dec(8), dec(2)));

    orders.release_crypto(seller, order.id).unwrap();
    assert!(matches!(
        orders.cancel_order(seller, order.id, None),
        Err(EscrowError::IllegalTransition { .. })
    ));
    desk.assert_conserved();
}

#[test]
fn cancelled_order_refunds_and_counts_against_the_canceller() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let buyer = desk.user(0);
    let offer = desk.list(seller, 1000, 10);
    let order = desk.take(buyer, &offer, 4000);

    let cancelled = desk
        .engine
        .orders()
        .cancel_order(buyer, order.id, Some("changed my mind".into()))
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(Actor::User(buyer)));
    assert_eq!(desk.balances(seller), (dec(10), Decimal::ZERO));
    assert_eq!(desk.available(&offer), dec(10));

    let profile = desk.engine.services().fraud.risk_profile(buyer).unwrap();
    assert_eq!(profile.stats.cancelled, 1);
    assert!(
        desk.notifier
            .sent_to(seller)
            .iter()
            .any(|n| n.kind == NotificationKind::OrderCancelled)
    );
    desk.assert_conserved();
}

#[test]
fn deposits_are_credited_once_per_reference() {
    let desk = Desk::new();
    let user = desk.user(0);
    let payments = desk.engine.payments();
    let verification = DepositVerification {
        reference: "gw-001".into(),
        user_id: user,
        amount: dec(5),
        success: true,
    };

    assert!(payments.confirm_deposit(&verification).unwrap().is_some());
    assert_eq!(
        payments.confirm_deposit(&verification).unwrap_err(),
        EscrowError::DuplicateTransaction {
            reference: "gw-001".into()
        }
    );
    let failed = DepositVerification {
        reference: "gw-002".into(),
        success: false,
        ..verification
    };
    assert!(payments.confirm_deposit(&failed).unwrap().is_none());

    assert_eq!(desk.balances(user), (dec(5), Decimal::ZERO));
    desk.assert_conserved();
}

fn verified_to_level_two(desk: &Desk, user: UserId) {
    let kyc = &desk.engine.services().kyc;
    kyc.submit(user, KycLevel::Level1, vec!["id.png".into()]).unwrap();
    kyc.approve_level(&desk.admin, user).unwrap();
    kyc.submit(user, KycLevel::Level2, vec!["address.pdf".into()]).unwrap();
    kyc.approve_level(&desk.admin, user).unwrap();
}

fn fee_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.payments.withdrawal_fee = Decimal::new(1, 1);
    config
}

#[test]
fn withdrawal_needs_kyc_and_charges_the_fee() {
    let desk = Desk::with_config(fee_config());
    let user = desk.user(10);
    let payments = desk.engine.payments();

    assert!(matches!(
        payments.request_withdrawal(user, dec(3), "bank:0123"),
        Err(EscrowError::KycNotEligible { .. })
    ));
    verified_to_level_two(&desk, user);

    let request = payments.request_withdrawal(user, dec(3), "bank:0123").unwrap();
    assert_eq!(request.fee, Decimal::new(1, 1));
    assert!(request.fee_transaction_id.is_some());
    assert_eq!(desk.balances(user), (Decimal::new(69, 1), Decimal::ZERO));
    desk.assert_conserved();

    let settled = payments.complete_withdrawal(request.transaction_id, true).unwrap();
    assert_eq!(settled.kind, TransactionKind::Withdrawal);
    assert_eq!(desk.balances(user), (Decimal::new(69, 1), Decimal::ZERO));
    assert!(matches!(
        payments.complete_withdrawal(request.transaction_id, false),
        Err(EscrowError::IllegalTransition { .. })
    ));
    desk.assert_conserved();
}

#[test]
fn failed_withdrawal_recredits_amount_and_fee() {
    let desk = Desk::with_config(fee_config());
    let user = desk.user(10);
    verified_to_level_two(&desk, user);
    let payments = desk.engine.payments();

    assert!(matches!(
        payments.request_withdrawal(user, dec(10), "bank:0123"),
        Err(EscrowError::InsufficientBalance { .. })
    ));
    let request = payments.request_withdrawal(user, dec(4), "bank:0123").unwrap();
    payments.complete_withdrawal(request.transaction_id, false).unwrap();

    assert_eq!(desk.balances(user), (dec(10), Decimal::ZERO));
    let reversals = desk
        .engine
        .services()
        .ledger
        .history(user)
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::WithdrawalReversal)
        .count();
    assert_eq!(reversals, 2);
    desk.assert_conserved();
}

#[test]
fn auto_match_takes_the_cheapest_offer() {
    let desk = Desk::new();
    let pricey = desk.list(desk.user(10), 1010, 10);
    let cheap = desk.list(desk.user(10), 1000, 10);
    let buyer = desk.user(0);

    let criteria = MatchCriteria {
        side: OfferSide::Buy,
        pair: pair(),
        fiat_amount: dec(2000),
        payment_methods: vec![],
        min_price: None,
        max_price: None,
    };
    let order = desk.engine.orders().auto_match(buyer, &criteria).unwrap();
    assert_eq!(order.offer_id, cheap.id);
    assert_eq!(order.payment_method, "bank_transfer");
    assert_eq!(desk.available(&cheap), dec(8));
    assert_eq!(desk.available(&pricey), dec(10));

    let nothing = MatchCriteria {
        pair: TradingPair::new("BTC", "NGN"),
        ..criteria
    };
    assert_eq!(
        desk.engine.orders().auto_match(buyer, &nothing).unwrap_err(),
        EscrowError::NoMatchFound
    );
}

#[test]
fn stale_lock_without_a_live_order_is_refunded() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let buyer = desk.user(0);
    let offer = desk.list(seller, 1000, 10);
    let live = desk.take(buyer, &offer, 2000);

    let svc = desk.engine.services();
    let orphan_order = OrderId::new();
    svc.ledger
        .lock(seller, dec(1), Memo::new("orphaned lock").order(orphan_order))
        .unwrap();
    let now = desk.clock.now();
    svc.store
        .transaction(|tx| {
            tx.put(EscrowLock {
                id: EscrowLockId::new(),
                order_id: orphan_order,
                owner: seller,
                amount: dec(1),
                status: EscrowStatus::Locked,
                created_at: now,
                expires_at: now + Duration::hours(1),
                settled_at: None,
            });
            Ok(())
        })
        .unwrap();
    assert_eq!(desk.balances(seller), (dec(7), dec(3)));

    desk.clock.advance(Duration::hours(25));
    let report = desk.engine.scheduler().cleanup_escrow_locks().unwrap();
    assert_eq!((report.examined, report.applied, report.skipped), (2, 1, 1));
    assert_eq!(desk.balances(seller), (dec(8), dec(2)));
    assert!(desk.order(live.id).escrow_locked);

    desk.engine.scheduler().sweep_expired_orders().unwrap();
    assert_eq!(desk.balances(seller), (dec(10), Decimal::ZERO));
    assert_eq!(desk.engine.scheduler().cleanup_escrow_locks().unwrap().examined, 0);
    desk.assert_conserved();
}

#[test]
fn quoted_order_goes_stale_when_the_offer_moves() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let buyer = desk.user(0);
    let offer = desk.list(seller, 1000, 10);
    let orders = desk.engine.orders();
    let quote = PriceGuard {
        price: dec(1000),
        min_price: None,
        max_price: Some(dec(1100)),
    };

    desk.reprice(seller, &offer, 5000);
    let err = orders
        .create_order_at(buyer, bank_order(&offer, 2000), quote)
        .unwrap_err();
    assert!(matches!(&err, EscrowError::MatchStale { offer_id, .. } if *offer_id == offer.id));
    assert_eq!(err.code(), 308);
    assert!(err.is_retryable());

    // Quoting the new price still breaches the requested maximum.
    let requoted = PriceGuard {
        price: dec(5000),
        ..quote
    };
    assert!(matches!(
        orders.create_order_at(buyer, bank_order(&offer, 2000), requoted),
        Err(EscrowError::MatchStale { .. })
    ));

    desk.engine
        .services()
        .offers
        .pause_offer(seller, offer.id)
        .unwrap();
    let unbounded = PriceGuard {
        price: dec(5000),
        min_price: None,
        max_price: None,
    };
    assert!(matches!(
        orders.create_order_at(buyer, bank_order(&offer, 2000), unbounded),
        Err(EscrowError::MatchStale { .. })
    ));
    assert!(matches!(
        orders.create_order(buyer, bank_order(&offer, 2000)),
        Err(EscrowError::OfferInactive(_))
    ));

    let body = ErrorBody::from(&err);
    assert_eq!(body.code, "ESC_ERR_308");
    assert!(body.retryable);

    assert_eq!(desk.available(&offer), dec(10));
    assert_eq!(desk.balances(seller), (dec(10), Decimal::ZERO));
    desk.assert_conserved();
}

#[test]
fn quoted_order_within_bounds_is_placed() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let buyer = desk.user(0);
    let offer = desk.list(seller, 1000, 10);
    let order = desk
        .engine
        .orders()
        .create_order_at(
            buyer,
            bank_order(&offer, 2000),
            PriceGuard {
                price: dec(1000),
                min_price: Some(dec(900)),
                max_price: Some(dec(1100)),
            },
        )
        .unwrap();
    assert_eq!(order.price, dec(1000));
    assert_eq!(order.crypto_amount, dec(2));
}

#[test]
fn oversized_deposits_and_withdrawals_are_invalid() {
    let desk = Desk::with_config(fee_config());
    let user = desk.user(10);
    let payments = desk.engine.payments();

    let deposit = payments.confirm_deposit(&DepositVerification {
        reference: "gw-huge".into(),
        user_id: user,
        amount: Decimal::MAX,
        success: true,
    });
    assert!(matches!(deposit, Err(EscrowError::InvalidAmount { .. })));
    assert!(matches!(
        payments.request_withdrawal(user, Decimal::MAX, "bank:0123"),
        Err(EscrowError::InvalidAmount { .. })
    ));
    assert_eq!(desk.balances(user), (dec(10), Decimal::ZERO));
    desk.assert_conserved();
}

#[test]
fn auto_match_never_fills_outside_the_price_bounds() {
    let desk = Desk::new();
    let seller = desk.user(100);
    let offer = desk.list(seller, 1000, 100);
    let buyers: Vec<UserId> = (0..24).map(|_| desk.user(0)).collect();
    let criteria = MatchCriteria {
        side: OfferSide::Buy,
        pair: pair(),
        fiat_amount: dec(1000),
        payment_methods: vec![],
        min_price: None,
        max_price: Some(dec(1100)),
    };

    let outcomes: Vec<Result<Order, EscrowError>> = thread::scope(|s| {
        let desk = &desk;
        let criteria = &criteria;
        let offer = &offer;
        s.spawn(move || {
            for i in 0..200 {
                let price = if i % 2 == 0 { dec(5000) } else { dec(1000) };
                let moved = desk.engine.services().offers.update_offer(
                    seller,
                    offer.id,
                    OfferUpdate {
                        price: Some(price),
                        ..OfferUpdate::default()
                    },
                );
                assert!(matches!(moved, Ok(_) | Err(EscrowError::WriteConflict { .. })));
            }
        });
        let takers: Vec<_> = buyers
            .iter()
            .map(|&buyer| s.spawn(move || desk.engine.orders().auto_match(buyer, criteria)))
            .collect();
        takers.into_iter().map(|t| t.join().unwrap()).collect()
    });

    for outcome in outcomes {
        match outcome {
            Ok(order) => {
                assert_eq!(order.price, dec(1000));
                assert_eq!(order.crypto_amount, Decimal::ONE);
            }
            Err(err) => assert!(
                matches!(
                    err,
                    EscrowError::MatchStale { .. }
                        | EscrowError::NoMatchFound
                        | EscrowError::WriteConflict { .. }
                ),
                "unexpected {err:?}"
            ),
        }
    }
    desk.assert_conserved();
}

#[test]
fn concurrent_takes_never_oversell_an_offer() {
    let desk = Desk::new();
    let seller = desk.user(10);
    let offer = desk.list(seller, 1000, 10);
    let buyers: Vec<UserId> = (0..8).map(|_| desk.user(0)).collect();
    let barrier = Barrier::new(buyers.len());

    let outcomes: Vec<Result<Order, EscrowError>> = thread::scope(|s| {
        let (desk, offer, barrier) = (&desk, &offer, &barrier);
        let takers: Vec<_> = buyers
            .iter()
            .map(|&buyer| {
                s.spawn(move || {
                    barrier.wait();
                    desk.engine
                        .orders()
                        .create_order(buyer, bank_order(offer, 2000))
                })
            })
            .collect();
        takers.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let mut placed = 0_i64;
    let mut conflicts = 0;
    for outcome in &outcomes {
        match outcome {
            Ok(_) => placed += 1,
            Err(EscrowError::WriteConflict { .. }) => conflicts += 1,
            Err(err) => assert!(
                matches!(
                    err,
                    EscrowError::OfferUnavailable { .. } | EscrowError::OfferInactive(_)
                ),
                "unexpected {err:?}"
            ),
        }
    }
    assert!(placed <= 5);
    if conflicts == 0 {
        assert_eq!(placed, 5);
    }
    assert_eq!(desk.available(&offer), dec(10 - 2 * placed));
    assert_eq!(desk.balances(seller), (dec(10 - 2 * placed), dec(2 * placed)));
    desk.assert_conserved();
}

#[test]
fn sweep_and_cancel_race_settles_once() {
    for _ in 0..16 {
        let desk = Desk::new();
        let seller = desk.user(10);
        let buyer = desk.user(0);
        let offer = desk.list(seller, 1000, 10);
        let order = desk.take(buyer, &offer, 2000);
        desk.clock.advance(Duration::minutes(20));
        let barrier = Barrier::new(2);

        let (swept, cancelled) = thread::scope(|s| {
            let sweep = s.spawn(|| {
                barrier.wait();
                desk.engine.scheduler().sweep_expired_orders()
            });
            let cancel = s.spawn(|| {
                barrier.wait();
                desk.engine.orders().cancel_order(buyer, order.id, None)
            });
            (sweep.join().unwrap(), cancel.join().unwrap())
        });

        let report = swept.unwrap();
        match desk.order(order.id).status {
            OrderStatus::Expired => {
                assert_eq!(report.applied, 1);
                assert!(matches!(cancelled, Err(EscrowError::IllegalTransition { .. })));
            }
            OrderStatus::Cancelled => {
                assert_eq!(report.applied, 0);
                cancelled.unwrap();
            }
            other => panic!("order left {other}"),
        }
        assert_eq!(desk.settlements(seller, order.id), 1);
        assert_eq!(desk.balances(seller), (dec(10), Decimal::ZERO));
        assert_eq!(desk.available(&offer), dec(10));
        desk.assert_conserved();
    }
}

#[test]
fn release_and_cancel_race_settles_once() {
    for _ in 0..16 {
        let desk = Desk::new();
        let seller = desk.user(10);
        let buyer = desk.user(0);
        let offer = desk.list(seller, 1000, 10);
        let order = desk.take(buyer, &offer, 2000);
        desk.engine.orders().mark_as_paid(buyer, order.id, None).unwrap();
        let barrier = Barrier::new(2);

        let (released, cancelled) = thread::scope(|s| {
            let release = s.spawn(|| {
                barrier.wait();
                desk.engine.orders().release_crypto(seller, order.id)
            });
            let cancel = s.spawn(|| {
                barrier.wait();
                desk.engine.orders().cancel_order(seller, order.id, None)
            });
            (release.join().unwrap(), cancel.join().unwrap())
        });

        assert_ne!(released.is_ok(), cancelled.is_ok(), "exactly one exit must win");
        let loser = released.as_ref().err().or(cancelled.as_ref().err());
        assert!(matches!(loser, Some(EscrowError::IllegalTransition { .. })));
        match desk.order(order.id).status {
            OrderStatus::Completed => {
                assert_eq!(desk.balances(seller), (dec(8), Decimal::ZERO));
                assert_eq!(desk.balances(buyer), (dec(2), Decimal::ZERO));
                assert_eq!(desk.available(&offer), dec(8));
            }
            OrderStatus::Cancelled => {
                assert_eq!(desk.balances(seller), (dec(10), Decimal::ZERO));
                assert_eq!(desk.balances(buyer), (Decimal::ZERO, Decimal::ZERO));
                assert_eq!(desk.available(&offer), dec(10));
            }
            other => panic!("order left {other}"),
        }
        assert_eq!(desk.settlements(seller, order.id), 1);
        desk.assert_conserved();
    }
}
