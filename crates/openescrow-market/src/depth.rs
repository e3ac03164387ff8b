//! Market depth: active offer availability aggregated into price buckets.
//!
//! - **Bids** (buy offers): `BTreeMap<Reverse<Decimal>, DepthLevel>` -- highest bucket first
//! - **Asks** (sell offers): `BTreeMap<Decimal, DepthLevel>` -- lowest bucket first

use std::cmp::Reverse;
use std::collections::BTreeMap;

use openescrow_types::{EscrowError, Offer, OfferSide, Result, TradingPair, checked_add};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::matching::Matcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Lower edge of the bucket.
    pub price: Decimal,
    /// Total crypto available across offers in the bucket.
    pub total_amount: Decimal,
    pub offer_count: usize,
}

impl DepthLevel {
    fn new(price: Decimal) -> Self {
        Self {
            price,
            total_amount: Decimal::ZERO,
            offer_count: 0,
        }
    }

    fn add(&mut self, offer: &Offer) -> Result<()> {
        self.total_amount = checked_add(self.total_amount, offer.available_amount, "depth level")?;
        self.offer_count += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDepth {
    pub pair: TradingPair,
    pub bucket: Decimal,
    /// Best (highest) first.
    pub bids: Vec<DepthLevel>,
    /// Best (lowest) first.
    pub asks: Vec<DepthLevel>,
}

impl MarketDepth {
    /// Aggregate `offers` into buckets of width `bucket`, keeping at most
    /// `levels` per side. Inactive and foreign-pair offers are skipped.
    ///
    /// Fails with `InvalidAmount` if a bucket total would overflow.
    pub fn build(
        pair: &TradingPair,
        offers: &[Offer],
        bucket: Decimal,
        levels: usize,
    ) -> Result<Self> {
        let mut bids: BTreeMap<Reverse<Decimal>, DepthLevel> = BTreeMap::new();
        let mut asks: BTreeMap<Decimal, DepthLevel> = BTreeMap::new();

        for offer in offers.iter().filter(|o| o.is_active() && &o.pair == pair) {
            let price = bucket_floor(offer.price, bucket)?;
            match offer.side {
                OfferSide::Buy => bids
                    .entry(Reverse(price))
                    .or_insert_with(|| DepthLevel::new(price))
                    .add(offer)?,
                OfferSide::Sell => asks
                    .entry(price)
                    .or_insert_with(|| DepthLevel::new(price))
                    .add(offer)?,
            }
        }

        Ok(Self {
            pair: pair.clone(),
            bucket,
            bids: bids.into_values().take(levels).collect(),
            asks: asks.into_values().take(levels).collect(),
        })
    }

    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

fn bucket_floor(price: Decimal, bucket: Decimal) -> Result<Decimal> {
    if bucket <= Decimal::ZERO {
        return Ok(price);
    }
    price
        .checked_div(bucket)
        .and_then(|steps| steps.floor().checked_mul(bucket))
        .ok_or_else(|| EscrowError::InvalidAmount {
            reason: format!("price {price} cannot be bucketed by {bucket}"),
        })
}

impl Matcher {
    /// Depth for `pair` using the configured bucket width.
    pub fn market_depth(&self, pair: &TradingPair, levels: usize) -> Result<MarketDepth> {
        let offers = self.store().scan::<Offer>()?;
        MarketDepth::build(pair, &offers, self.config().depth_bucket, levels)
    }
}
