//! KYC tier types.
//!
//! Four levels with monotonically increasing limits. Level 0 is the
//! unverified baseline; each higher level must be approved in order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycLevel {
    Level0,
    Level1,
    Level2,
    Level3,
}

impl KycLevel {
    pub const ALL: [Self; 4] = [Self::Level0, Self::Level1, Self::Level2, Self::Level3];

    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Level0 => 0,
            Self::Level1 => 1,
            Self::Level2 => 2,
            Self::Level3 => 3,
        }
    }

    #[must_use]
    pub fn from_u8(level: u8) -> Option<Self> {
        Self::ALL.get(usize::from(level)).copied()
    }

    /// The level directly below, `None` for level 0.
    #[must_use]
    pub fn previous(self) -> Option<Self> {
        self.as_u8().checked_sub(1).and_then(Self::from_u8)
    }

    /// Limits and permissions granted at this level.
    #[must_use]
    pub fn limits(self) -> KycLimits {
        match self {
            Self::Level0 => KycLimits {
                daily_limit: Decimal::ZERO,
                monthly_limit: Decimal::ZERO,
                max_order_size: Decimal::ZERO,
                can_trade: false,
                can_withdraw: false,
            },
            Self::Level1 => KycLimits {
                daily_limit: Decimal::new(1_000, 0),
                monthly_limit: Decimal::new(10_000, 0),
                max_order_size: Decimal::new(500, 0),
                can_trade: true,
                can_withdraw: false,
            },
            Self::Level2 => KycLimits {
                daily_limit: Decimal::new(10_000, 0),
                monthly_limit: Decimal::new(100_000, 0),
                max_order_size: Decimal::new(5_000, 0),
                can_trade: true,
                can_withdraw: true,
            },
            Self::Level3 => KycLimits {
                daily_limit: Decimal::new(100_000, 0),
                monthly_limit: Decimal::new(1_000_000, 0),
                max_order_size: Decimal::new(50_000, 0),
                can_trade: true,
                can_withdraw: true,
            },
        }
    }
}

impl std::fmt::Display for KycLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.as_u8())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycLimits {
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub max_order_size: Decimal,
    pub can_trade: bool,
    pub can_withdraw: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    /// Level 0, nothing approved yet.
    Unverified,
    /// A first submission awaits review.
    Pending,
    Approved,
    /// The first submission was rejected.
    Rejected,
    Expired,
}

impl std::fmt::Display for KycStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unverified => write!(f, "UNVERIFIED"),
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycAction {
    Trade,
    Withdraw,
}

impl std::fmt::Display for KycAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trade => write!(f, "trade"),
            Self::Withdraw => write!(f, "withdraw"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycProfile {
    pub user_id: UserId,
    /// Highest approved level.
    pub level: KycLevel,
    pub status: KycStatus,
    /// Level currently under review, if any.
    pub pending_level: Option<KycLevel>,
    pub documents: Vec<String>,
    pub limits: KycLimits,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl KycProfile {
    #[must_use]
    pub fn unverified(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            level: KycLevel::Level0,
            status: KycStatus::Unverified,
            pending_level: None,
            documents: Vec::new(),
            limits: KycLevel::Level0.limits(),
            approved_at: None,
            expires_at: None,
            rejection_reason: None,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == KycStatus::Expired || self.expires_at.is_some_and(|at| now > at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_increase_monotonically() {
        for pair in KycLevel::ALL.windows(2) {
            let (lo, hi) = (pair[0].limits(), pair[1].limits());
            assert!(hi.daily_limit > lo.daily_limit);
            assert!(hi.monthly_limit > lo.monthly_limit);
            assert!(hi.max_order_size > lo.max_order_size);
            assert!(hi.can_trade >= lo.can_trade);
            assert!(hi.can_withdraw >= lo.can_withdraw);
        }
    }

    #[test]
    fn previous_level() {
        assert_eq!(KycLevel::Level0.previous(), None);
        assert_eq!(KycLevel::Level2.previous(), Some(KycLevel::Level1));
        assert_eq!(KycLevel::from_u8(4), None);
    }
}
