//! # openescrow-market
//!
//! Standing offers and how takers find them.
//!
//! - [`OfferBook`]: create, update, pause, resume, and soft-delete offers;
//!   guarded availability adjustments for the order lifecycle; search
//! - [`Matcher`]: ranked offer matching for a taker, price suggestion
//! - [`MarketDepth`]: availability aggregated into price buckets per side

pub mod depth;
pub mod matching;
pub mod offer_book;

pub use depth::{DepthLevel, MarketDepth};
pub use matching::{Confidence, MatchCriteria, MatchResult, Matcher, PriceSuggestion};
pub use offer_book::{NewOffer, OfferBook, OfferQuery, OfferUpdate};
