//! The offer book: standing buy/sell listings.
//!
//! `available_amount` is only adjusted through [`OfferBook::decrease_available_in`]
//! and [`OfferBook::increase_available_in`], which the order lifecycle calls
//! inside its own transaction.

use std::sync::Arc;

use openescrow_store::{Store, Tx};
use openescrow_types::{
    Clock, EscrowError, Offer, OfferId, OfferSide, OfferStats, OfferStatus, Order, OrderConfig,
    Page, Result, TradingPair, UserId, Wallet, checked_add, constants, validate_amount,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Input for [`OfferBook::create_offer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOffer {
    pub side: OfferSide,
    pub pair: TradingPair,
    pub price: Decimal,
    pub min_limit: Decimal,
    pub max_limit: Decimal,
    pub available_amount: Decimal,
    pub payment_methods: Vec<String>,
    #[serde(default)]
    pub payment_window_minutes: Option<u32>,
    #[serde(default)]
    pub terms: Option<String>,
}

/// Owner-editable fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferUpdate {
    pub price: Option<Decimal>,
    pub min_limit: Option<Decimal>,
    pub max_limit: Option<Decimal>,
    pub payment_methods: Option<Vec<String>>,
    pub payment_window_minutes: Option<u32>,
    pub terms: Option<String>,
}

/// Filters for [`OfferBook::search`]. Only active offers are returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferQuery {
    pub side: Option<OfferSide>,
    pub asset: Option<String>,
    pub fiat: Option<String>,
    pub payment_method: Option<String>,
    /// Keep offers whose `max_limit` reaches at least this fiat amount.
    pub min_amount: Option<Decimal>,
    /// Keep offers whose `min_limit` is at most this fiat amount.
    pub max_amount: Option<Decimal>,
    pub page: usize,
    pub page_size: usize,
}

impl OfferQuery {
    fn matches(&self, offer: &Offer) -> bool {
        offer.is_active()
            && self.side.is_none_or(|side| offer.side == side)
            && self
                .asset
                .as_deref()
                .is_none_or(|a| offer.pair.asset.eq_ignore_ascii_case(a))
            && self
                .fiat
                .as_deref()
                .is_none_or(|f| offer.pair.fiat.eq_ignore_ascii_case(f))
            && self
                .payment_method
                .as_deref()
                .is_none_or(|m| offer.accepts_payment_method(m))
            && self.min_amount.is_none_or(|amount| offer.max_limit >= amount)
            && self.max_amount.is_none_or(|amount| offer.min_limit <= amount)
    }
}

pub struct OfferBook {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    config: OrderConfig,
}

impl OfferBook {
    #[must_use]
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, config: OrderConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// List a new offer.
    ///
    /// A sell offer requires the owner's spendable balance to cover
    /// `available_amount`. Nothing is locked until an order is placed.
    pub fn create_offer(&self, owner: UserId, input: NewOffer) -> Result<Offer> {
        let window = input
            .payment_window_minutes
            .unwrap_or(constants::DEFAULT_PAYMENT_WINDOW_MINUTES);
        self.validate_terms(
            input.price,
            input.min_limit,
            input.max_limit,
            &input.payment_methods,
            window,
        )?;
        validate_amount(
            input.available_amount,
            constants::CRYPTO_PRECISION,
            "available amount",
        )?;
        if input.pair.asset.trim().is_empty() || input.pair.fiat.trim().is_empty() {
            return Err(EscrowError::InvalidRequest {
                reason: "asset and fiat currency are required".to_string(),
            });
        }

        let offer = self.store.transaction(|tx| {
            if input.side == OfferSide::Sell {
                let balance = tx
                    .get::<Wallet>(owner)
                    .map_or(Decimal::ZERO, |w| w.balance);
                if balance < input.available_amount {
                    return Err(EscrowError::InsufficientBalance {
                        needed: input.available_amount,
                        available: balance,
                    });
                }
            }
            let now = self.clock.now();
            let offer = Offer {
                id: OfferId::new(),
                owner,
                side: input.side,
                pair: input.pair.clone(),
                price: input.price,
                min_limit: input.min_limit,
                max_limit: input.max_limit,
                available_amount: input.available_amount,
                payment_methods: input.payment_methods.clone(),
                payment_window_minutes: window,
                terms: input.terms.clone(),
                status: OfferStatus::Active,
                stats: OfferStats::default(),
                created_at: now,
                updated_at: now,
            };
            tx.put(offer.clone());
            Ok(offer)
        })?;

        info!(
            offer_id = %offer.id,
            owner = %owner,
            side = %offer.side,
            pair = %offer.pair,
            price = %offer.price,
            available = %offer.available_amount,
            "offer created"
        );
        Ok(offer)
    }

    pub fn update_offer(
        &self,
        owner: UserId,
        offer_id: OfferId,
        update: OfferUpdate,
    ) -> Result<Offer> {
        let offer = self.store.transaction(|tx| {
            let mut offer = Self::owned_in(tx, owner, offer_id)?;
            if offer.status == OfferStatus::Deleted {
                return Err(EscrowError::illegal("offer", offer.status, "update"));
            }
            if let Some(price) = update.price {
                offer.price = price;
            }
            if let Some(min) = update.min_limit {
                offer.min_limit = min;
            }
            if let Some(max) = update.max_limit {
                offer.max_limit = max;
            }
            if let Some(methods) = &update.payment_methods {
                offer.payment_methods.clone_from(methods);
            }
            if let Some(window) = update.payment_window_minutes {
                offer.payment_window_minutes = window;
            }
            if let Some(terms) = &update.terms {
                offer.terms = Some(terms.clone());
            }
            self.validate_terms(
                offer.price,
                offer.min_limit,
                offer.max_limit,
                &offer.payment_methods,
                offer.payment_window_minutes,
            )?;
            offer.updated_at = self.clock.now();
            tx.put(offer.clone());
            Ok(offer)
        })?;
        info!(offer_id = %offer_id, "offer updated");
        Ok(offer)
    }

    pub fn pause_offer(&self, owner: UserId, offer_id: OfferId) -> Result<Offer> {
        self.set_status(owner, offer_id, "pause", |offer| match offer.status {
            OfferStatus::Active | OfferStatus::Closed => Some(OfferStatus::Paused),
            _ => None,
        })
    }

    /// Resume a paused offer; it comes back closed if nothing is available.
    pub fn resume_offer(&self, owner: UserId, offer_id: OfferId) -> Result<Offer> {
        self.set_status(owner, offer_id, "resume", |offer| match offer.status {
            OfferStatus::Paused if offer.available_amount > Decimal::ZERO => {
                Some(OfferStatus::Active)
            }
            OfferStatus::Paused => Some(OfferStatus::Closed),
            _ => None,
        })
    }

    /// Soft-delete an offer.
    ///
    /// # Errors
    /// `OfferHasActiveOrders` while any non-terminal order references it.
    pub fn delete_offer(&self, owner: UserId, offer_id: OfferId) -> Result<Offer> {
        let offer = self.store.transaction(|tx| {
            let mut offer = Self::owned_in(tx, owner, offer_id)?;
            if offer.status == OfferStatus::Deleted {
                return Err(EscrowError::illegal("offer", offer.status, "delete"));
            }
            let active = tx
                .scan::<Order>()
                .into_iter()
                .any(|o| o.offer_id == offer_id && !o.is_terminal());
            if active {
                return Err(EscrowError::OfferHasActiveOrders(offer_id));
            }
            offer.status = OfferStatus::Deleted;
            offer.updated_at = self.clock.now();
            tx.put(offer.clone());
            Ok(offer)
        })?;
        info!(offer_id = %offer_id, "offer deleted");
        Ok(offer)
    }

    /// Reserve `amount` of the offer's availability for a new order.
    ///
    /// # Errors
    /// `OfferInactive` unless active, `OfferUnavailable` if `amount`
    /// exceeds availability.
    pub fn decrease_available_in(
        &self,
        tx: &mut Tx<'_>,
        offer_id: OfferId,
        amount: Decimal,
    ) -> Result<Offer> {
        let mut offer = tx.require::<Offer>(offer_id, || EscrowError::OfferNotFound(offer_id))?;
        if !offer.is_active() {
            return Err(EscrowError::OfferInactive(offer_id));
        }
        if amount > offer.available_amount {
            return Err(EscrowError::OfferUnavailable {
                requested: amount,
                available: offer.available_amount,
            });
        }
        offer.available_amount -= amount;
        if offer.available_amount == Decimal::ZERO {
            offer.status = OfferStatus::Closed;
        }
        offer.updated_at = self.clock.now();
        tx.put(offer.clone());
        debug!(offer_id = %offer_id, amount = %amount, left = %offer.available_amount, "offer availability decreased");
        Ok(offer)
    }

    /// Return `amount` to the offer. A closed offer reopens; paused and
    /// deleted offers keep their status.
    pub fn increase_available_in(
        &self,
        tx: &mut Tx<'_>,
        offer_id: OfferId,
        amount: Decimal,
    ) -> Result<Offer> {
        let mut offer = tx.require::<Offer>(offer_id, || EscrowError::OfferNotFound(offer_id))?;
        offer.available_amount = checked_add(offer.available_amount, amount, "offer availability")?;
        if offer.status == OfferStatus::Closed && offer.available_amount > Decimal::ZERO {
            offer.status = OfferStatus::Active;
        }
        offer.updated_at = self.clock.now();
        tx.put(offer.clone());
        debug!(offer_id = %offer_id, amount = %amount, left = %offer.available_amount, "offer availability restored");
        Ok(offer)
    }

    /// Count one finished order against the offer's stats.
    pub fn record_outcome_in(
        &self,
        tx: &mut Tx<'_>,
        offer_id: OfferId,
        completed: bool,
    ) -> Result<Offer> {
        let mut offer = tx.require::<Offer>(offer_id, || EscrowError::OfferNotFound(offer_id))?;
        offer.stats.total_orders += 1;
        if completed {
            offer.stats.completed_orders += 1;
        }
        offer.stats.recompute_rating();
        offer.updated_at = self.clock.now();
        tx.put(offer.clone());
        Ok(offer)
    }

    pub fn get_offer(&self, offer_id: OfferId) -> Result<Offer> {
        self.store
            .get::<Offer>(offer_id)?
            .ok_or(EscrowError::OfferNotFound(offer_id))
    }

    /// The owner's offers, deleted ones included, newest first.
    pub fn list_user_offers(&self, owner: UserId) -> Result<Vec<Offer>> {
        let mut offers: Vec<Offer> = self
            .store
            .scan::<Offer>()?
            .into_iter()
            .filter(|o| o.owner == owner)
            .collect();
        offers.reverse();
        Ok(offers)
    }

    /// Active offers matching `query`, newest first.
    pub fn search(&self, query: &OfferQuery) -> Result<Page<Offer>> {
        let mut offers: Vec<Offer> = self
            .store
            .scan::<Offer>()?
            .into_iter()
            .filter(|o| query.matches(o))
            .collect();
        offers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::paginate(offers, query.page, query.page_size))
    }

    fn owned_in(tx: &mut Tx<'_>, owner: UserId, offer_id: OfferId) -> Result<Offer> {
        let offer = tx.require::<Offer>(offer_id, || EscrowError::OfferNotFound(offer_id))?;
        if offer.owner != owner {
            return Err(EscrowError::Forbidden {
                reason: format!("{offer_id} belongs to another user"),
            });
        }
        Ok(offer)
    }

    fn set_status(
        &self,
        owner: UserId,
        offer_id: OfferId,
        action: &str,
        next: impl Fn(&Offer) -> Option<OfferStatus>,
    ) -> Result<Offer> {
        let offer = self.store.transaction(|tx| {
            let mut offer = Self::owned_in(tx, owner, offer_id)?;
            let status = next(&offer).ok_or_else(|| EscrowError::illegal("offer", offer.status, action))?;
            offer.status = status;
            offer.updated_at = self.clock.now();
            tx.put(offer.clone());
            Ok(offer)
        })?;
        info!(offer_id = %offer_id, status = %offer.status, action, "offer status changed");
        Ok(offer)
    }

    fn validate_terms(
        &self,
        price: Decimal,
        min_limit: Decimal,
        max_limit: Decimal,
        payment_methods: &[String],
        window: u32,
    ) -> Result<()> {
        validate_amount(price, constants::FIAT_PRECISION, "price")?;
        validate_amount(min_limit, constants::FIAT_PRECISION, "min limit")?;
        validate_amount(max_limit, constants::FIAT_PRECISION, "max limit")?;
        if min_limit > max_limit {
            return Err(EscrowError::LimitViolation {
                reason: format!("min limit {min_limit} exceeds max limit {max_limit}"),
            });
        }
        if payment_methods.is_empty() || payment_methods.iter().any(|m| m.trim().is_empty()) {
            return Err(EscrowError::InvalidRequest {
                reason: "at least one non-empty payment method is required".to_string(),
            });
        }
        let (min, max) = (
            self.config.min_payment_window_minutes,
            self.config.max_payment_window_minutes,
        );
        if !(min..=max).contains(&window) {
            return Err(EscrowError::InvalidPaymentWindow {
                minutes: window,
                min,
                max,
            });
        }
        Ok(())
    }
}
