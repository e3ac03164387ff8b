//! Error types for the OpenEscrow engine.
//!
//! All errors use the `ESC_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by category:
//! - 1xx: Authorization
//! - 2xx: Validation
//! - 3xx: State
//! - 4xx: Resource
//! - 5xx: Conflict
//! - 6xx: Risk
//! - 9xx: Internal

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{OfferId, OrderId};

/// Coarse classification of an [`EscrowError`], reported to callers
/// alongside the numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authorization,
    Validation,
    State,
    Resource,
    Conflict,
    Risk,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Authorization => "AUTHORIZATION",
            Self::Validation => "VALIDATION",
            Self::State => "STATE",
            Self::Resource => "RESOURCE",
            Self::Conflict => "CONFLICT",
            Self::Risk => "RISK",
            Self::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Central error enum for all OpenEscrow operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    // =================================================================
    // Authorization (1xx)
    // =================================================================
    /// No authenticated caller was supplied.
    #[error("ESC_ERR_100: Unauthenticated")]
    Unauthenticated,

    /// The caller is authenticated but may not perform this action.
    #[error("ESC_ERR_101: Forbidden: {reason}")]
    Forbidden { reason: String },

    /// The caller is neither buyer nor seller of the order.
    #[error("ESC_ERR_102: Caller is not a participant of {0}")]
    NotParticipant(OrderId),

    // =================================================================
    // Validation (2xx)
    // =================================================================
    /// Amount is non-positive or carries too many decimal places.
    #[error("ESC_ERR_200: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Amount falls outside an offer's or tier's limits.
    #[error("ESC_ERR_201: Limit violation: {reason}")]
    LimitViolation { reason: String },

    /// Payment window outside the allowed bounds.
    #[error("ESC_ERR_202: Payment window {minutes} min outside {min}..={max} min")]
    InvalidPaymentWindow { minutes: u32, min: u32, max: u32 },

    /// The offer does not accept the requested payment method.
    #[error("ESC_ERR_203: Payment method not supported: {method}")]
    PaymentMethodUnsupported { method: String },

    /// Buyer and seller would be the same user.
    #[error("ESC_ERR_204: Self-trade prevented: cannot trade against own offer")]
    SelfTrade,

    /// Structurally invalid request (missing fields, bad values).
    #[error("ESC_ERR_205: Invalid request: {reason}")]
    InvalidRequest { reason: String },

    // =================================================================
    // State (3xx)
    // =================================================================
    /// The requested transition is not in the lifecycle graph.
    #[error("ESC_ERR_300: Illegal transition: cannot {action} {entity} in state {from}")]
    IllegalTransition {
        entity: String,
        from: String,
        action: String,
    },

    /// The order's payment deadline has passed.
    #[error("ESC_ERR_301: Order expired: {0}")]
    OrderExpired(OrderId),

    /// The offer is paused, closed, or deleted.
    #[error("ESC_ERR_302: Offer inactive: {0}")]
    OfferInactive(OfferId),

    /// Not enough availability left on the offer.
    #[error("ESC_ERR_303: Offer unavailable: requested {requested}, available {available}")]
    OfferUnavailable {
        requested: Decimal,
        available: Decimal,
    },

    /// The offer still has non-terminal orders referencing it.
    #[error("ESC_ERR_304: Offer {0} has active orders")]
    OfferHasActiveOrders(OfferId),

    /// A dispute is already open for this order.
    #[error("ESC_ERR_305: Dispute already open for {0}")]
    DisputeAlreadyOpen(OrderId),

    /// KYC submission or action is not allowed in the current KYC state.
    #[error("ESC_ERR_306: KYC: {reason}")]
    KycNotEligible { reason: String },

    /// KYC verification has expired.
    #[error("ESC_ERR_307: KYC verification expired")]
    KycExpired,

    /// The matched offer changed between matching and order creation.
    /// Retrying the match is safe.
    #[error("ESC_ERR_308: Match stale for {offer_id}: {reason}")]
    MatchStale { offer_id: OfferId, reason: String },

    /// No offer satisfies the match criteria.
    #[error("ESC_ERR_309: No matching offer found")]
    NoMatchFound,

    // =================================================================
    // Resource (4xx)
    // =================================================================
    #[error("ESC_ERR_400: Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("ESC_ERR_401: Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("ESC_ERR_402: Offer not found: {0}")]
    OfferNotFound(OfferId),

    #[error("ESC_ERR_403: Dispute not found: {0}")]
    DisputeNotFound(String),

    #[error("ESC_ERR_404: Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Locked balance is insufficient, or the escrow lock is not `locked`.
    #[error("ESC_ERR_405: Escrow not locked: {reason}")]
    EscrowNotLocked { reason: String },

    /// An escrow lock already exists for the order.
    #[error("ESC_ERR_406: Escrow already locked for {0}")]
    EscrowAlreadyLocked(OrderId),

    /// Not enough spendable balance.
    #[error("ESC_ERR_407: Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    // =================================================================
    // Conflict (5xx)
    // =================================================================
    /// An externally sourced credit with this reference was already applied.
    #[error("ESC_ERR_500: Duplicate transaction reference: {reference}")]
    DuplicateTransaction { reference: String },

    /// Optimistic transaction kept conflicting with concurrent writers.
    #[error("ESC_ERR_501: Write conflict after {attempts} attempts")]
    WriteConflict { attempts: usize },

    // =================================================================
    // Risk (6xx)
    // =================================================================
    #[error("ESC_ERR_600: User suspended")]
    UserSuspended,

    #[error("ESC_ERR_601: Risk too high: score {score}")]
    HighRisk { score: Decimal },

    #[error("ESC_ERR_602: Rate limited: {reason}")]
    RateLimited { reason: String },

    // =================================================================
    // Internal (9xx)
    // =================================================================
    /// Supply conservation invariant violated. Critical safety alert.
    #[error("ESC_ERR_900: Supply invariant violation: {reason}")]
    SupplyInvariantViolation { reason: String },

    #[error("ESC_ERR_901: Configuration error: {0}")]
    Configuration(String),

    #[error("ESC_ERR_902: Serialization error: {0}")]
    Serialization(String),

    #[error("ESC_ERR_903: Internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    /// Category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self.code() {
            100..=199 => ErrorCategory::Authorization,
            200..=299 => ErrorCategory::Validation,
            300..=399 => ErrorCategory::State,
            400..=499 => ErrorCategory::Resource,
            500..=599 => ErrorCategory::Conflict,
            600..=699 => ErrorCategory::Risk,
            _ => ErrorCategory::Internal,
        }
    }

    /// Numeric code, matching the `ESC_ERR_` prefix in the message.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Unauthenticated => 100,
            Self::Forbidden { .. } => 101,
            Self::NotParticipant(_) => 102,
            Self::InvalidAmount { .. } => 200,
            Self::LimitViolation { .. } => 201,
            Self::InvalidPaymentWindow { .. } => 202,
            Self::PaymentMethodUnsupported { .. } => 203,
            Self::SelfTrade => 204,
            Self::InvalidRequest { .. } => 205,
            Self::IllegalTransition { .. } => 300,
            Self::OrderExpired(_) => 301,
            Self::OfferInactive(_) => 302,
            Self::OfferUnavailable { .. } => 303,
            Self::OfferHasActiveOrders(_) => 304,
            Self::DisputeAlreadyOpen(_) => 305,
            Self::KycNotEligible { .. } => 306,
            Self::KycExpired => 307,
            Self::MatchStale { .. } => 308,
            Self::NoMatchFound => 309,
            Self::WalletNotFound(_) => 400,
            Self::OrderNotFound(_) => 401,
            Self::OfferNotFound(_) => 402,
            Self::DisputeNotFound(_) => 403,
            Self::TransactionNotFound(_) => 404,
            Self::EscrowNotLocked { .. } => 405,
            Self::EscrowAlreadyLocked(_) => 406,
            Self::InsufficientBalance { .. } => 407,
            Self::DuplicateTransaction { .. } => 500,
            Self::WriteConflict { .. } => 501,
            Self::UserSuspended => 600,
            Self::HighRisk { .. } => 601,
            Self::RateLimited { .. } => 602,
            Self::SupplyInvariantViolation { .. } => 900,
            Self::Configuration(_) => 901,
            Self::Serialization(_) => 902,
            Self::Internal(_) => 903,
        }
    }

    /// Whether the caller may safely retry the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MatchStale { .. } | Self::WriteConflict { .. })
    }

    /// Shorthand for [`EscrowError::IllegalTransition`].
    pub fn illegal(
        entity: impl Into<String>,
        from: impl std::fmt::Display,
        action: impl Into<String>,
    ) -> Self {
        Self::IllegalTransition {
            entity: entity.into(),
            from: from.to_string(),
            action: action.into(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, EscrowError>;

impl From<serde_json::Error> for EscrowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_code_prefix() {
        let err = EscrowError::OrderNotFound(OrderId::new());
        let msg = err.to_string();
        assert!(msg.starts_with("ESC_ERR_401"), "Got: {msg}");
        assert_eq!(err.code(), 401);
    }

    #[test]
    fn insufficient_balance_display() {
        let err = EscrowError::InsufficientBalance {
            needed: Decimal::new(100, 0),
            available: Decimal::new(50, 0),
        };
        let msg = err.to_string();
        assert!(msg.contains("ESC_ERR_407"));
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
        assert_eq!(err.category(), ErrorCategory::Resource);
    }

    #[test]
    fn code_matches_display_prefix_for_every_category() {
        let errors = vec![
            EscrowError::Unauthenticated,
            EscrowError::SelfTrade,
            EscrowError::illegal("order", "COMPLETED", "cancel"),
            EscrowError::EscrowAlreadyLocked(OrderId::new()),
            EscrowError::DuplicateTransaction {
                reference: "dep-1".into(),
            },
            EscrowError::UserSuspended,
            EscrowError::Internal("boom".into()),
        ];
        for err in errors {
            let msg = err.to_string();
            let expected = format!("ESC_ERR_{}", err.code());
            assert!(msg.starts_with(&expected), "{msg} vs {expected}");
        }
    }

    #[test]
    fn categories() {
        assert_eq!(
            EscrowError::Unauthenticated.category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            EscrowError::InvalidAmount { reason: "x".into() }.category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            EscrowError::OrderExpired(OrderId::new()).category(),
            ErrorCategory::State
        );
        assert_eq!(
            EscrowError::WriteConflict { attempts: 3 }.category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            EscrowError::RateLimited { reason: "x".into() }.category(),
            ErrorCategory::Risk
        );
    }

    #[test]
    fn only_race_errors_are_retryable() {
        assert!(
            EscrowError::MatchStale {
                offer_id: OfferId::new(),
                reason: "gone".into()
            }
            .is_retryable()
        );
        assert!(EscrowError::WriteConflict { attempts: 1 }.is_retryable());
        assert!(!EscrowError::SelfTrade.is_retryable());
    }
}
