//! Order types and the order lifecycle graph.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────────────┐  mark paid   ┌──────────────────┐  release   ┌───────────┐
//!   │ PENDING_PAYMENT ├─────────────▶│ AWAITING_RELEASE ├───────────▶│ COMPLETED │
//!   └──┬──────┬───┬───┘              └───┬─────────┬────┘            └─────▲─────┘
//!      │      │   │ sweep                │ cancel  │ dispute               │ resolve
//!      │      │   ▼                      ▼         ▼                       │
//!      │      │ ┌─────────┐        ┌───────────┐ ┌──────────┐              │
//!      │      │ │ EXPIRED │        │ CANCELLED │ │ DISPUTED ├──────────────┘
//!      │      │ └─────────┘        └─────▲─────┘ └────▲─────┘
//!      │      └─────────── cancel ───────┘            │
//!      └────────────────── dispute ───────────────────┘
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{DisputeId, EscrowLockId, OfferId, OfferSide, OrderId, TradingPair, UserId};

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    AwaitingRelease,
    Completed,
    Cancelled,
    Disputed,
    Expired,
}

impl OrderStatus {
    /// Is `self → target` an edge of the lifecycle graph?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        use OrderStatus::{AwaitingRelease, Cancelled, Completed, Disputed, Expired, PendingPayment};
        matches!(
            (self, target),
            (PendingPayment, AwaitingRelease | Cancelled | Disputed | Expired)
                | (AwaitingRelease, Completed | Cancelled | Disputed)
                | (Disputed, Completed)
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::AwaitingRelease => "AWAITING_RELEASE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Disputed => "DISPUTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Who performed an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    Admin(UserId),
    /// Scheduler jobs.
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Admin(id) => write!(f, "admin:{id}"),
            Self::System => write!(f, "system"),
        }
    }
}

/// An accepted trade against an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub offer_id: OfferId,
    pub offer_side: OfferSide,
    pub pair: TradingPair,
    pub buyer: UserId,
    pub seller: UserId,
    /// The user who placed the order against the offer.
    pub taker: UserId,
    pub price: Decimal,
    pub fiat_amount: Decimal,
    /// `fiat_amount / price`, truncated to crypto precision.
    pub crypto_amount: Decimal,
    pub payment_method: String,
    pub status: OrderStatus,
    pub payment_deadline: DateTime<Utc>,
    pub escrow_locked: bool,
    pub escrow_amount: Decimal,
    pub escrow_lock_id: Option<EscrowLockId>,
    pub payment_proof_url: Option<String>,
    pub dispute_id: Option<DisputeId>,
    pub cancelled_by: Option<Actor>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        self.buyer == user || self.seller == user
    }

    /// The participant opposite `user`, if `user` participates.
    #[must_use]
    pub fn counterpart_of(&self, user: UserId) -> Option<UserId> {
        if user == self.buyer {
            Some(self.seller)
        } else if user == self.seller {
            Some(self.buyer)
        } else {
            None
        }
    }

    /// The offer owner (maker) of this order.
    #[must_use]
    pub fn maker(&self) -> UserId {
        match self.offer_side {
            OfferSide::Sell => self.seller,
            OfferSide::Buy => self.buyer,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the payment deadline plus `buffer` has elapsed at `now`.
    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>, buffer: chrono::Duration) -> bool {
        now > self.payment_deadline + buffer
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    /// A pending-payment order with a 15 minute window and no escrow attached.
    pub fn dummy(buyer: UserId, seller: UserId, crypto_amount: Decimal) -> Self {
        let now = Utc::now();
        let price = Decimal::new(1000, 0);
        Self {
            id: OrderId::new(),
            offer_id: OfferId::new(),
            offer_side: OfferSide::Sell,
            pair: TradingPair::new("USDT", "NGN"),
            buyer,
            seller,
            taker: buyer,
            price,
            fiat_amount: crypto_amount * price,
            crypto_amount,
            payment_method: "bank_transfer".to_string(),
            status: OrderStatus::PendingPayment,
            payment_deadline: now + chrono::Duration::minutes(15),
            escrow_locked: false,
            escrow_amount: Decimal::ZERO,
            escrow_lock_id: None,
            payment_proof_url: None,
            dispute_id: None,
            cancelled_by: None,
            cancel_reason: None,
            created_at: now,
            paid_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
        }
    }
}
