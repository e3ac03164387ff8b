//! # openescrow-risk
//!
//! **Trade gates**: who may trade, and how much.
//!
//! ## Design Principles
//!
//! - **Fail-closed**: a suspended or critical user is rejected before any
//!   balance or offer is touched
//! - **Derived, not edited**: risk profiles are recomputed from order
//!   history; there is no manual score override
//! - **Ordered tiers**: KYC levels are approved one at a time, and an expired
//!   profile loses every permission until renewed
//!
//! ## Components
//!
//! - [`FraudEngine`]: risk scoring, auto-suspension, order rate limits
//! - [`KycService`]: tiered verification with per-level limits

pub mod fraud;
pub mod kyc;

pub use fraud::FraudEngine;
pub use kyc::KycService;
