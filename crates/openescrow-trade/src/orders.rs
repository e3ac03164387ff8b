//! Order service: the escrowed trade lifecycle.
//!
//! ## Flow
//!
//! ```text
//! create_order ─▶ PENDING_PAYMENT ─ mark_as_paid ─▶ AWAITING_RELEASE ─ release_crypto ─▶ COMPLETED
//!     │                 │  └─ sweep ─▶ EXPIRED              │
//!     │                 └────────── cancel_order ───────────┴─▶ CANCELLED
//!     └─ fraud gate, limits, availability, seller lock, escrow lock: one transaction
//! ```
//!
//! Each mutation re-reads the order inside its transaction and checks the
//! lifecycle edge there, so racing callers see an `IllegalTransition` instead
//! of a double settlement. Notifications and risk refreshes run after the
//! commit.

use std::sync::Arc;

use chrono::Duration;
use openescrow_store::Tx;
use openescrow_types::{
    Actor, Caller, EscrowError, KycAction, Offer, OfferId, OfferSide, Order, OrderId, OrderStatus,
    Page, Result, UserId, constants, fiat_to_crypto, validate_amount,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::escrow;
use crate::notify::{Notification, NotificationKind};
use crate::services::Services;

/// Input for [`OrderService::create_order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub offer_id: OfferId,
    pub fiat_amount: Decimal,
    pub payment_method: String,
}

/// The terms a taker accepted when choosing an offer. An order placed with
/// a guard fails with `MatchStale` if the offer no longer honours them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceGuard {
    /// Offer price seen at match time.
    pub price: Decimal,
    #[serde(default)]
    pub min_price: Option<Decimal>,
    #[serde(default)]
    pub max_price: Option<Decimal>,
}

impl PriceGuard {
    fn check(&self, offer: &Offer) -> Result<()> {
        let reason = if offer.price != self.price {
            format!("price moved from {} to {}", self.price, offer.price)
        } else if self.min_price.is_some_and(|min| offer.price < min) {
            format!("price {} below the requested minimum", offer.price)
        } else if self.max_price.is_some_and(|max| offer.price > max) {
            format!("price {} above the requested maximum", offer.price)
        } else {
            return Ok(());
        };
        Err(EscrowError::MatchStale {
            offer_id: offer.id,
            reason,
        })
    }
}

/// Filter for [`OrderService::list_user_orders`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub page: usize,
    pub page_size: usize,
}

pub struct OrderService {
    svc: Arc<Services>,
}

impl OrderService {
    #[must_use]
    pub fn new(svc: Arc<Services>) -> Self {
        Self { svc }
    }

    pub(crate) fn services(&self) -> &Services {
        &self.svc
    }

    /// Take `input.fiat_amount` of an offer. The seller's crypto is locked in
    /// escrow in the same transaction that creates the order.
    pub fn create_order(&self, taker: UserId, input: NewOrder) -> Result<Order> {
        self.place(taker, input, None)
    }

    /// [`create_order`](Self::create_order) against a previously quoted
    /// offer. If the offer's price left `guard`, or the offer was
    /// withdrawn or drained, nothing is placed and the error is `MatchStale`.
    pub fn create_order_at(
        &self,
        taker: UserId,
        input: NewOrder,
        guard: PriceGuard,
    ) -> Result<Order> {
        let offer_id = input.offer_id;
        self.place(taker, input, Some(guard)).map_err(|err| match err {
            EscrowError::OfferInactive(_)
            | EscrowError::OfferUnavailable { .. }
            | EscrowError::OfferNotFound(_) => EscrowError::MatchStale {
                offer_id,
                reason: err.to_string(),
            },
            other => other,
        })
    }

    fn place(&self, taker: UserId, input: NewOrder, guard: Option<PriceGuard>) -> Result<Order> {
        validate_amount(input.fiat_amount, constants::FIAT_PRECISION, "fiat amount")?;
        let now = self.svc.clock.now();

        let order = self.svc.store.transaction(|tx| {
            self.svc.fraud.validate_user_can_trade_in(tx, taker)?;

            let offer = tx.require::<Offer>(input.offer_id, || {
                EscrowError::OfferNotFound(input.offer_id)
            })?;
            if let Some(guard) = &guard {
                guard.check(&offer)?;
            }
            let crypto_amount = self.check_offer_terms(&offer, taker, &input)?;
            if self.svc.config.orders.require_kyc_for_trading {
                self.svc
                    .kyc
                    .validate_action_in(tx, taker, KycAction::Trade, crypto_amount)?;
            }

            let (buyer, seller) = match offer.side {
                OfferSide::Sell => (taker, offer.owner),
                OfferSide::Buy => (offer.owner, taker),
            };
            let order_id = OrderId::new();
            self.svc
                .offers
                .decrease_available_in(tx, offer.id, crypto_amount)?;
            let lock = escrow::lock_in(&self.svc, tx, order_id, seller, crypto_amount, now)?;

            let order = Order {
                id: order_id,
                offer_id: offer.id,
                offer_side: offer.side,
                pair: offer.pair.clone(),
                buyer,
                seller,
                taker,
                price: offer.price,
                fiat_amount: input.fiat_amount,
                crypto_amount,
                payment_method: input.payment_method.clone(),
                status: OrderStatus::PendingPayment,
                payment_deadline: now + Duration::minutes(i64::from(offer.payment_window_minutes)),
                escrow_locked: true,
                escrow_amount: crypto_amount,
                escrow_lock_id: Some(lock.id),
                payment_proof_url: None,
                dispute_id: None,
                cancelled_by: None,
                cancel_reason: None,
                created_at: now,
                paid_at: None,
                completed_at: None,
                cancelled_at: None,
                updated_at: now,
            };
            tx.put(order.clone());
            Ok(order)
        })?;

        info!(
            order_id = %order.id,
            offer_id = %order.offer_id,
            buyer = %order.buyer,
            seller = %order.seller,
            crypto_amount = %order.crypto_amount,
            fiat_amount = %order.fiat_amount,
            "order created, escrow locked"
        );
        self.svc.notify(&[
            Notification::system(
                order.id,
                format!(
                    "Order opened for {} {} at {} {}. Pay within the window; crypto is held in escrow.",
                    order.crypto_amount, order.pair.asset, order.price, order.pair.fiat
                ),
            ),
            Notification::to_user(
                order.buyer,
                order.id,
                NotificationKind::OrderCreated,
                format!("Pay {} {} before {}", order.fiat_amount, order.pair.fiat, order.payment_deadline),
            ),
            Notification::to_user(
                order.seller,
                order.id,
                NotificationKind::OrderCreated,
                format!("{} {} locked in escrow", order.crypto_amount, order.pair.asset),
            ),
        ]);
        Ok(order)
    }

    /// Buyer confirms the fiat payment was sent.
    pub fn mark_as_paid(
        &self,
        caller: UserId,
        order_id: OrderId,
        proof_url: Option<String>,
    ) -> Result<Order> {
        let now = self.svc.clock.now();
        let order = self.mutate(order_id, |_, order| {
            require_participant(order, caller)?;
            if caller != order.buyer {
                return Err(forbidden("only the buyer can mark an order paid"));
            }
            require_edge(order, OrderStatus::AwaitingRelease, "mark paid")?;
            if now > order.payment_deadline {
                return Err(EscrowError::OrderExpired(order.id));
            }
            order.status = OrderStatus::AwaitingRelease;
            order.paid_at = Some(now);
            order.payment_proof_url.clone_from(&proof_url);
            Ok(())
        })?;

        info!(order_id = %order.id, buyer = %caller, "order marked paid");
        self.svc.notify(&[Notification::to_user(
            order.seller,
            order.id,
            NotificationKind::PaymentMarked,
            "Buyer marked the order paid; confirm receipt and release",
        )]);
        Ok(order)
    }

    /// Seller releases the escrowed crypto to the buyer.
    pub fn release_crypto(&self, caller: UserId, order_id: OrderId) -> Result<Order> {
        let now = self.svc.clock.now();
        let order = self.mutate(order_id, |tx, order| {
            require_participant(order, caller)?;
            if caller != order.seller {
                return Err(forbidden("only the seller can release crypto"));
            }
            if order.status != OrderStatus::AwaitingRelease {
                return Err(EscrowError::illegal("order", order.status, "release"));
            }
            escrow::release_in(&self.svc, tx, order, now)?;
            self.svc.offers.record_outcome_in(tx, order.offer_id, true)?;
            order.status = OrderStatus::Completed;
            order.completed_at = Some(now);
            Ok(())
        })?;

        info!(
            order_id = %order.id,
            seller = %order.seller,
            buyer = %order.buyer,
            amount = %order.crypto_amount,
            "crypto released"
        );
        self.svc.refresh_risk(&[order.buyer, order.seller]);
        self.svc.notify(&[Notification::to_user(
            order.buyer,
            order.id,
            NotificationKind::CryptoReleased,
            format!("{} {} released to your wallet", order.crypto_amount, order.pair.asset),
        )]);
        Ok(order)
    }

    /// Cancel before release. Either party may cancel an unpaid order; once
    /// paid only the seller may.
    pub fn cancel_order(
        &self,
        caller: UserId,
        order_id: OrderId,
        reason: Option<String>,
    ) -> Result<Order> {
        let now = self.svc.clock.now();
        let order = self.mutate(order_id, |tx, order| {
            require_participant(order, caller)?;
            require_edge(order, OrderStatus::Cancelled, "cancel")?;
            if order.status == OrderStatus::AwaitingRelease && caller != order.seller {
                return Err(forbidden("a paid order can only be cancelled by the seller"));
            }
            escrow::refund_in(&self.svc, tx, order, now)?;
            escrow::restore_availability_in(&self.svc, tx, order)?;
            if caller == order.maker() {
                self.svc.offers.record_outcome_in(tx, order.offer_id, false)?;
            }
            order.status = OrderStatus::Cancelled;
            order.cancelled_by = Some(Actor::User(caller));
            order.cancel_reason.clone_from(&reason);
            order.cancelled_at = Some(now);
            Ok(())
        })?;

        info!(order_id = %order.id, by = %caller, reason = ?order.cancel_reason, "order cancelled");
        if let Err(err) = self.svc.fraud.record_cancellation(caller) {
            warn!(user = %caller, error = %err, "risk update after cancellation failed");
        }
        if let Some(other) = order.counterpart_of(caller) {
            self.svc.notify(&[Notification::to_user(
                other,
                order.id,
                NotificationKind::OrderCancelled,
                "The order was cancelled by the counterparty",
            )]);
        }
        Ok(order)
    }

    /// Expire an unpaid order past its deadline plus the configured buffer.
    /// Returns `None` without changes if the order is no longer eligible.
    pub fn expire_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let now = self.svc.clock.now();
        let buffer = Duration::minutes(self.svc.config.orders.expiry_buffer_minutes);
        let expired = self.svc.store.transaction(|tx| {
            let mut order = require_order(tx, order_id)?;
            if order.status != OrderStatus::PendingPayment || !order.is_past_deadline(now, buffer) {
                return Ok(None);
            }
            escrow::refund_in(&self.svc, tx, &mut order, now)?;
            escrow::restore_availability_in(&self.svc, tx, &order)?;
            order.status = OrderStatus::Expired;
            order.cancelled_by = Some(Actor::System);
            order.cancel_reason = Some("payment window elapsed".to_string());
            order.cancelled_at = Some(now);
            order.updated_at = now;
            tx.put(order.clone());
            Ok(Some(order))
        })?;

        let Some(order) = expired else {
            debug!(order_id = %order_id, "order not eligible for expiry, skipped");
            return Ok(None);
        };
        info!(order_id = %order.id, deadline = %order.payment_deadline, "order expired, escrow refunded");
        self.svc.notify(&[
            Notification::to_user(
                order.buyer,
                order.id,
                NotificationKind::OrderExpired,
                "The payment window elapsed and the order expired",
            ),
            Notification::to_user(
                order.seller,
                order.id,
                NotificationKind::OrderExpired,
                "The order expired unpaid; your crypto was returned",
            ),
        ]);
        Ok(Some(order))
    }

    /// An order visible to its participants and to admins.
    pub fn get_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order> {
        let order = self
            .svc
            .store
            .get::<Order>(order_id)?
            .ok_or(EscrowError::OrderNotFound(order_id))?;
        if !caller.is_admin() {
            require_participant(&order, caller.user_id)?;
        }
        Ok(order)
    }

    /// The user's orders as buyer or seller, newest first.
    pub fn list_user_orders(&self, user: UserId, query: &OrderQuery) -> Result<Page<Order>> {
        let mut orders: Vec<Order> = self
            .svc
            .store
            .scan::<Order>()?
            .into_iter()
            .filter(|o| o.involves(user) && query.status.is_none_or(|s| o.status == s))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::paginate(orders, query.page, query.page_size))
    }

    /// Validate `input` against `offer` and return the crypto amount.
    fn check_offer_terms(&self, offer: &Offer, taker: UserId, input: &NewOrder) -> Result<Decimal> {
        if offer.owner == taker {
            return Err(EscrowError::SelfTrade);
        }
        if !offer.is_active() {
            return Err(EscrowError::OfferInactive(offer.id));
        }
        if !offer.within_limits(input.fiat_amount) {
            return Err(EscrowError::LimitViolation {
                reason: format!(
                    "{} outside offer limits {}..={}",
                    input.fiat_amount, offer.min_limit, offer.max_limit
                ),
            });
        }
        if !offer.accepts_payment_method(&input.payment_method) {
            return Err(EscrowError::PaymentMethodUnsupported {
                method: input.payment_method.clone(),
            });
        }
        let crypto_amount = fiat_to_crypto(input.fiat_amount, offer.price)?;
        if crypto_amount <= Decimal::ZERO {
            return Err(EscrowError::InvalidAmount {
                reason: format!("{} buys nothing at {}", input.fiat_amount, offer.price),
            });
        }
        if crypto_amount > offer.available_amount {
            return Err(EscrowError::OfferUnavailable {
                requested: crypto_amount,
                available: offer.available_amount,
            });
        }
        debug!(offer_id = %offer.id, crypto_amount = %crypto_amount, "offer terms accepted");
        Ok(crypto_amount)
    }

    /// Load, mutate, and store one order in a transaction.
    fn mutate(
        &self,
        order_id: OrderId,
        mut apply: impl FnMut(&mut Tx<'_>, &mut Order) -> Result<()>,
    ) -> Result<Order> {
        self.svc.store.transaction(|tx| {
            let mut order = require_order(tx, order_id)?;
            apply(tx, &mut order)?;
            order.updated_at = self.svc.clock.now();
            tx.put(order.clone());
            Ok(order)
        })
    }
}

pub(crate) fn require_order(tx: &mut Tx<'_>, order_id: OrderId) -> Result<Order> {
    tx.require::<Order>(order_id, || EscrowError::OrderNotFound(order_id))
}

pub(crate) fn require_participant(order: &Order, user: UserId) -> Result<()> {
    if order.involves(user) {
        Ok(())
    } else {
        Err(EscrowError::NotParticipant(order.id))
    }
}

fn require_edge(order: &Order, target: OrderStatus, action: &str) -> Result<()> {
    if order.status.can_transition_to(target) {
        Ok(())
    } else {
        Err(EscrowError::illegal("order", order.status, action))
    }
}

fn forbidden(reason: &str) -> EscrowError {
    EscrowError::Forbidden {
        reason: reason.to_string(),
    }
}
