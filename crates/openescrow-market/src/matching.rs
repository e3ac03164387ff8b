//! Offer matching and price suggestion.
//!
//! A buy request searches sell offers cheapest first; a sell request searches
//! buy offers dearest first. Equal prices go to the older offer.

use std::cmp::Ordering;
use std::sync::Arc;

use openescrow_store::Store;
use openescrow_types::{
    EscrowError, MatchingConfig, Offer, OfferSide, Order, OrderStatus, Result, TradingPair,
    UserId, checked_add, checked_mul, constants, fiat_to_crypto, validate_amount,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a taker is looking for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCriteria {
    /// The requester's side: `Buy` looks for sell offers.
    pub side: OfferSide,
    pub pair: TradingPair,
    pub fiat_amount: Decimal,
    /// Acceptable payment methods; empty accepts any.
    #[serde(default)]
    pub payment_methods: Vec<String>,
    #[serde(default)]
    pub min_price: Option<Decimal>,
    #[serde(default)]
    pub max_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matches: Vec<Offer>,
    pub best_match: Option<Offer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    #[must_use]
    pub fn from_samples(samples: usize) -> Self {
        if samples >= constants::HIGH_CONFIDENCE_SAMPLES {
            Self::High
        } else if samples >= constants::MEDIUM_CONFIDENCE_SAMPLES {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSuggestion {
    pub pair: TradingPair,
    /// Side of the listing the suggestion is for.
    pub side: OfferSide,
    pub suggested_price: Option<Decimal>,
    /// Average of recent completed trade prices.
    pub market_price: Option<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub sample_size: usize,
    pub confidence: Confidence,
}

/// Read-only matching over the offer book.
pub struct Matcher {
    store: Arc<Store>,
    config: MatchingConfig,
}

impl Matcher {
    #[must_use]
    pub fn new(store: Arc<Store>, config: MatchingConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// Offers `requester` could trade `criteria.fiat_amount` against, best
    /// first, at most `max_results`.
    pub fn find_matches(&self, requester: UserId, criteria: &MatchCriteria) -> Result<MatchResult> {
        validate_amount(criteria.fiat_amount, constants::FIAT_PRECISION, "fiat amount")?;
        let wanted = criteria.side.opposite();

        let mut candidates = Vec::new();
        for offer in self.store.scan::<Offer>()? {
            if offer.owner == requester
                || !offer.is_active()
                || offer.side != wanted
                || offer.pair != criteria.pair
                || !offer.within_limits(criteria.fiat_amount)
                || criteria.min_price.is_some_and(|p| offer.price < p)
                || criteria.max_price.is_some_and(|p| offer.price > p)
            {
                continue;
            }
            if !criteria.payment_methods.is_empty()
                && !criteria
                    .payment_methods
                    .iter()
                    .any(|m| offer.accepts_payment_method(m))
            {
                continue;
            }
            if fiat_to_crypto(criteria.fiat_amount, offer.price)? > offer.available_amount {
                continue;
            }
            candidates.push(offer);
        }

        candidates.sort_by(|a, b| priority(criteria.side, a, b));
        candidates.truncate(self.config.max_results);

        debug!(
            requester = %requester,
            side = %criteria.side,
            pair = %criteria.pair,
            fiat_amount = %criteria.fiat_amount,
            found = candidates.len(),
            "offer matching complete"
        );
        Ok(MatchResult {
            best_match: candidates.first().cloned(),
            matches: candidates,
        })
    }

    /// Suggest a competitive price for a new `side` listing on `pair`.
    ///
    /// A sell listing undercuts the best ask by 0.1%; a buy listing outbids
    /// the best bid by 0.1%. Without a competing offer the recent market
    /// average is used.
    pub fn suggest_price(&self, pair: &TradingPair, side: OfferSide) -> Result<PriceSuggestion> {
        let mut completed: Vec<Order> = self
            .store
            .scan::<Order>()?
            .into_iter()
            .filter(|o| o.status == OrderStatus::Completed && &o.pair == pair)
            .collect();
        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        completed.truncate(self.config.price_sample_size);

        let sample_size = completed.len();
        let market_price = if sample_size == 0 {
            None
        } else {
            let sum = completed
                .iter()
                .try_fold(Decimal::ZERO, |acc, o| checked_add(acc, o.price, "price sample"))?;
            Some((sum / Decimal::from(sample_size)).round_dp(constants::FIAT_PRECISION))
        };

        let active: Vec<Offer> = self
            .store
            .scan::<Offer>()?
            .into_iter()
            .filter(|o| o.is_active() && &o.pair == pair)
            .collect();
        let best_bid = active
            .iter()
            .filter(|o| o.side == OfferSide::Buy)
            .map(|o| o.price)
            .max();
        let best_ask = active
            .iter()
            .filter(|o| o.side == OfferSide::Sell)
            .map(|o| o.price)
            .min();

        let inside = match side {
            OfferSide::Sell => best_ask.map(|p| (p, Decimal::new(999, 3))),
            OfferSide::Buy => best_bid.map(|p| (p, Decimal::new(1001, 3))),
        }
        .map(|(p, step)| checked_mul(p, step, "suggested price"))
        .transpose()?;
        let suggested_price = inside
            .or(market_price)
            .map(|p| p.round_dp(constants::FIAT_PRECISION));

        Ok(PriceSuggestion {
            pair: pair.clone(),
            side,
            suggested_price,
            market_price,
            best_bid,
            best_ask,
            sample_size,
            confidence: Confidence::from_samples(sample_size),
        })
    }
}

/// Best offer first for a requester on `side`.
fn priority(side: OfferSide, a: &Offer, b: &Offer) -> Ordering {
    let by_price = match side {
        OfferSide::Buy => a.price.cmp(&b.price),
        OfferSide::Sell => b.price.cmp(&a.price),
    };
    by_price
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Fail with `NoMatchFound` when nothing matched.
pub fn best_or_none(result: &MatchResult) -> Result<&Offer> {
    result.best_match.as_ref().ok_or(EscrowError::NoMatchFound)
}
