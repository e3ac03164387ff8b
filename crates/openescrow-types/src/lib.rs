//! # openescrow-types
//!
//! Shared types, errors, and configuration for the **OpenEscrow** trading
//! engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`UserId`], [`OfferId`], [`OrderId`], [`TransactionId`], [`EscrowLockId`], [`DisputeId`], [`TradingPair`]
//! - **Ledger model**: [`Wallet`], [`Transaction`], [`TransactionKind`], [`TransactionStatus`]
//! - **Offer model**: [`Offer`], [`OfferSide`], [`OfferStatus`], [`OfferStats`]
//! - **Order model**: [`Order`], [`OrderStatus`], [`Actor`]
//! - **Escrow model**: [`EscrowLock`], [`EscrowStatus`]
//! - **Dispute model**: [`Dispute`], [`DisputeStatus`], [`DisputeWinner`], [`Evidence`]
//! - **Risk / KYC**: [`RiskProfile`], [`RiskLevel`], [`KycProfile`], [`KycLevel`]
//! - **Configuration**: [`EngineConfig`] and its sections
//! - **Errors**: [`EscrowError`] with `ESC_ERR_` prefix codes
//! - **Boundary**: [`Caller`], [`ApiResponse`], [`Clock`]
//! - **Constants**: system-wide limits and defaults

pub mod clock;
pub mod config;
pub mod constants;
pub mod dispute;
pub mod error;
pub mod escrow;
pub mod ids;
pub mod kyc;
pub mod offer;
pub mod order;
pub mod response;
pub mod risk;
pub mod wallet;

pub use clock::*;
pub use config::*;
pub use dispute::*;
pub use error::*;
pub use escrow::*;
pub use ids::*;
pub use kyc::*;
pub use offer::*;
pub use order::*;
pub use response::*;
pub use risk::*;
pub use wallet::*;

// Constants are accessed via `openescrow_types::constants::FOO`
// (not re-exported to avoid name collisions).

use rust_decimal::{Decimal, RoundingStrategy};

/// Validate a strictly positive amount with at most `precision` decimals.
pub fn validate_amount(amount: Decimal, precision: u32, what: &str) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(EscrowError::InvalidAmount {
            reason: format!("{what} must be positive, got {amount}"),
        });
    }
    if amount > constants::MAX_AMOUNT {
        return Err(EscrowError::InvalidAmount {
            reason: format!("{what} {amount} exceeds the maximum {}", constants::MAX_AMOUNT),
        });
    }
    if amount.normalize().scale() > precision {
        return Err(EscrowError::InvalidAmount {
            reason: format!("{what} {amount} exceeds {precision} decimal places"),
        });
    }
    Ok(())
}

/// `a + b`, failing with `InvalidAmount` instead of overflowing.
pub fn checked_add(a: Decimal, b: Decimal, what: &str) -> Result<Decimal> {
    a.checked_add(b).ok_or_else(|| EscrowError::InvalidAmount {
        reason: format!("{what} overflows: {a} + {b}"),
    })
}

/// `a * b`, failing with `InvalidAmount` instead of overflowing.
pub fn checked_mul(a: Decimal, b: Decimal, what: &str) -> Result<Decimal> {
    a.checked_mul(b).ok_or_else(|| EscrowError::InvalidAmount {
        reason: format!("{what} overflows: {a} * {b}"),
    })
}

/// Crypto bought by `fiat_amount` at `price`, truncated to crypto precision.
pub fn fiat_to_crypto(fiat_amount: Decimal, price: Decimal) -> Result<Decimal> {
    if price <= Decimal::ZERO {
        return Err(EscrowError::InvalidAmount {
            reason: format!("price must be positive, got {price}"),
        });
    }
    let crypto = fiat_amount
        .checked_div(price)
        .ok_or_else(|| EscrowError::InvalidAmount {
            reason: format!("{fiat_amount} / {price} overflows"),
        })?;
    Ok(crypto.round_dp_with_strategy(constants::CRYPTO_PRECISION, RoundingStrategy::ToZero))
}
