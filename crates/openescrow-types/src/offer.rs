//! Offer types: standing buy/sell listings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{OfferId, TradingPair, UserId};

/// Which side the offer owner is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferSide {
    /// Owner wants to buy crypto for fiat.
    Buy,
    /// Owner wants to sell crypto for fiat.
    Sell,
}

impl OfferSide {
    /// The side a counterparty must be on.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OfferSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Lifecycle status of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Active,
    Paused,
    /// Availability exhausted; reopens when availability is restored.
    Closed,
    /// Soft-deleted. Terminal.
    Deleted,
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Deleted => write!(f, "DELETED"),
        }
    }
}

/// Aggregate outcome statistics for an offer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferStats {
    pub completed_orders: u64,
    pub total_orders: u64,
    /// `completed_orders / total_orders * 5`, zero when no orders counted.
    pub rating: Decimal,
}

impl OfferStats {
    /// Recompute the rating from the counters.
    pub fn recompute_rating(&mut self) {
        self.rating = if self.total_orders == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(self.completed_orders) / Decimal::from(self.total_orders)
                * Decimal::new(5, 0))
            .round_dp(2)
        };
    }
}

/// A standing listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub owner: UserId,
    pub side: OfferSide,
    pub pair: TradingPair,
    /// Fiat per unit of crypto.
    pub price: Decimal,
    /// Smallest fiat amount per order.
    pub min_limit: Decimal,
    /// Largest fiat amount per order.
    pub max_limit: Decimal,
    /// Crypto still available for new orders.
    pub available_amount: Decimal,
    pub payment_methods: Vec<String>,
    pub payment_window_minutes: u32,
    pub terms: Option<String>,
    pub status: OfferStatus,
    pub stats: OfferStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == OfferStatus::Active
    }

    /// Case-insensitive payment method check.
    #[must_use]
    pub fn accepts_payment_method(&self, method: &str) -> bool {
        self.payment_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Whether `fiat_amount` lies within the offer's per-order limits.
    #[must_use]
    pub fn within_limits(&self, fiat_amount: Decimal) -> bool {
        fiat_amount >= self.min_limit && fiat_amount <= self.max_limit
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Offer {
    /// An active `USDT/NGN` offer accepting bank transfers, limits 100..=10000 fiat.
    pub fn dummy(owner: UserId, side: OfferSide, price: Decimal, available: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: OfferId::new(),
            owner,
            side,
            pair: TradingPair::new("USDT", "NGN"),
            price,
            min_limit: Decimal::new(100, 0),
            max_limit: Decimal::new(10_000, 0),
            available_amount: available,
            payment_methods: vec!["bank_transfer".to_string()],
            payment_window_minutes: crate::constants::DEFAULT_PAYMENT_WINDOW_MINUTES,
            terms: None,
            status: OfferStatus::Active,
            stats: OfferStats::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_from_counters() {
        let mut stats = OfferStats {
            completed_orders: 3,
            total_orders: 4,
            rating: Decimal::ZERO,
        };
        stats.recompute_rating();
        assert_eq!(stats.rating, Decimal::new(375, 2));
    }

    #[test]
    fn rating_zero_without_orders() {
        let mut stats = OfferStats::default();
        stats.recompute_rating();
        assert_eq!(stats.rating, Decimal::ZERO);
    }

    #[test]
    fn limits_and_methods() {
        let offer = Offer::dummy(UserId::new(), OfferSide::Sell, Decimal::new(1000, 0), Decimal::ONE);
        assert!(offer.within_limits(Decimal::new(100, 0)));
        assert!(offer.within_limits(Decimal::new(10_000, 0)));
        assert!(!offer.within_limits(Decimal::new(99, 0)));
        assert!(offer.accepts_payment_method("BANK_TRANSFER"));
        assert!(!offer.accepts_payment_method("paypal"));
    }

    #[test]
    fn opposite_side() {
        assert_eq!(OfferSide::Buy.opposite(), OfferSide::Sell);
        assert_eq!(OfferSide::Sell.opposite(), OfferSide::Buy);
    }
}
