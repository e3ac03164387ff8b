//! Dispute types.
//!
//! A dispute is tied 1:1 to a non-terminal order. While it is open, buyer-
//! and seller-driven transitions on the order are frozen until an admin
//! resolves it in favour of one side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DisputeId, OrderId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    ResolvedBuyer,
    ResolvedSeller,
}

impl DisputeStatus {
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self == Self::Open
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::ResolvedBuyer => write!(f, "RESOLVED_BUYER"),
            Self::ResolvedSeller => write!(f, "RESOLVED_SELLER"),
        }
    }
}

/// The side an admin rules for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeWinner {
    Buyer,
    Seller,
}

impl DisputeWinner {
    #[must_use]
    pub fn resolved_status(self) -> DisputeStatus {
        match self {
            Self::Buyer => DisputeStatus::ResolvedBuyer,
            Self::Seller => DisputeStatus::ResolvedSeller,
        }
    }
}

/// A piece of evidence. The upload itself lives in object storage; only
/// its URL is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub submitted_by: UserId,
    pub description: String,
    pub url: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResolution {
    pub winner: DisputeWinner,
    pub admin: UserId,
    pub note: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub order_id: OrderId,
    pub initiator: UserId,
    pub counterpart: UserId,
    pub reason: String,
    pub status: DisputeStatus,
    pub evidence: Vec<Evidence>,
    pub resolution: Option<DisputeResolution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dispute {
    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        self.initiator == user || self.counterpart == user
    }
}
