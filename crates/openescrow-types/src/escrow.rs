//! # EscrowLock: funds reserved against a single order
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  release to buyer  ┌──────────┐
//!   │ LOCKED ├───────────────────▶│ RELEASED │
//!   └───┬────┘                    └──────────┘
//!       │ cancel / expire / seller wins
//!       ▼
//!   ┌──────────┐
//!   │ REFUNDED │
//!   └──────────┘
//! ```
//!
//! Transitions are monotonic: the terminal state is set exactly once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EscrowError, EscrowLockId, OrderId, Result, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Funds sit in the owner's locked balance.
    Locked,
    /// Funds moved to the counterparty.
    Released,
    /// Funds returned to the owner's spendable balance.
    Refunded,
}

impl EscrowStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!((self, target), (Self::Locked, Self::Released | Self::Refunded))
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "LOCKED"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLock {
    pub id: EscrowLockId,
    pub order_id: OrderId,
    /// The seller whose funds are locked.
    pub owner: UserId,
    pub amount: Decimal,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl EscrowLock {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.status == EscrowStatus::Locked
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Attempt to transition to RELEASED.
    pub fn mark_released(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.settle(EscrowStatus::Released, now)
    }

    /// Attempt to transition to REFUNDED.
    pub fn mark_refunded(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.settle(EscrowStatus::Refunded, now)
    }

    fn settle(&mut self, target: EscrowStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(EscrowError::EscrowNotLocked {
                reason: format!("{} is {}, cannot become {target}", self.id, self.status),
            });
        }
        self.status = target;
        self.settled_at = Some(now);
        Ok(())
    }
}
