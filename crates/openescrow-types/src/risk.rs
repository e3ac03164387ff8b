//! Risk profile types.
//!
//! A [`RiskProfile`] is derived from a user's order history by the fraud
//! engine. It is recomputed, never edited by hand.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a 0–100 score onto a level: <20 low, 20–39 medium, 40–69 high,
    /// ≥70 critical.
    #[must_use]
    pub fn from_score(score: Decimal) -> Self {
        if score >= Decimal::new(70, 0) {
            Self::Critical
        } else if score >= Decimal::new(40, 0) {
            Self::High
        } else if score >= Decimal::new(20, 0) {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    HighCancellationRate,
    HighDisputeRate,
    LowCompletionRate,
    ExcessiveCancellations,
}

/// Order-outcome counters the score was computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStats {
    pub total: u64,
    pub completed: u64,
    /// Cancelled plus expired.
    pub cancelled: u64,
    pub disputed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub user_id: UserId,
    pub risk_score: Decimal,
    pub risk_level: RiskLevel,
    pub flags: Vec<RiskFlag>,
    pub is_suspended: bool,
    pub suspended_at: Option<DateTime<Utc>>,
    pub stats: OrderStats,
    pub updated_at: DateTime<Utc>,
}

impl RiskProfile {
    /// Profile for a user with no history.
    #[must_use]
    pub fn clean(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            risk_score: Decimal::ZERO,
            risk_level: RiskLevel::Low,
            flags: Vec::new(),
            is_suspended: false,
            suspended_at: None,
            stats: OrderStats::default(),
            updated_at: now,
        }
    }

    #[must_use]
    pub fn has_flag(&self, flag: RiskFlag) -> bool {
        self.flags.contains(&flag)
    }
}
