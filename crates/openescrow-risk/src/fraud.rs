//! Fraud engine: heuristic risk scoring and the trade gate.
//!
//! Every order path goes through [`FraudEngine::validate_user_can_trade_in`]
//! before anything is reserved. Profiles are derived from the user's full
//! order history and recomputed, never edited.
//!
//! ## Score
//!
//! ```text
//! score = min(cancel%, 40) + min(dispute% × 1.5, 30) + max(0, 70 − complete%) / 70 × 30
//! ```
//!
//! Rates are percentages of all orders the user took part in; expired
//! orders count as cancelled. A user without orders scores zero.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use openescrow_store::{Store, Tx};
use openescrow_types::{
    Actor, Clock, EscrowError, Order, OrderStats, OrderStatus, Result, RiskConfig, RiskFlag,
    RiskLevel, RiskProfile, UserId,
};
use rust_decimal::Decimal;
use tracing::{info, warn};

const CANCEL_WEIGHT_CAP: Decimal = Decimal::from_parts(40, 0, 0, false, 0);
const DISPUTE_WEIGHT_CAP: Decimal = Decimal::from_parts(30, 0, 0, false, 0);
const COMPLETION_TARGET: Decimal = Decimal::from_parts(70, 0, 0, false, 0);
const MAX_SCORE: Decimal = Decimal::ONE_HUNDRED;

const HIGH_CANCELLATION_RATE: Decimal = Decimal::from_parts(30, 0, 0, false, 0);
const HIGH_DISPUTE_RATE: Decimal = Decimal::TEN;

pub struct FraudEngine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    config: RiskConfig,
}

impl FraudEngine {
    #[must_use]
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, config: RiskConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Recompute and store the user's profile.
    pub fn update_risk_profile(&self, user: UserId) -> Result<RiskProfile> {
        let (previous, profile) = self.store.transaction(|tx| {
            let previous = tx.get::<RiskProfile>(user);
            let profile = self.compute_in(tx, user, previous.as_ref());
            tx.put(profile.clone());
            Ok((previous, profile))
        })?;

        let was_suspended = previous.is_some_and(|p| p.is_suspended);
        if profile.is_suspended && !was_suspended {
            warn!(
                user = %user,
                score = %profile.risk_score,
                flags = ?profile.flags,
                "user auto-suspended"
            );
        } else {
            info!(
                user = %user,
                score = %profile.risk_score,
                level = %profile.risk_level,
                "risk profile updated"
            );
        }
        Ok(profile)
    }

    /// Refresh after a cancellation by `actor`, flagging a burst of
    /// cancellations within 24 hours.
    pub fn record_cancellation(&self, actor: UserId) -> Result<RiskProfile> {
        let profile = self.update_risk_profile(actor)?;
        if profile.has_flag(RiskFlag::ExcessiveCancellations) {
            warn!(user = %actor, "excessive cancellations in the last 24h");
        }
        Ok(profile)
    }

    /// The stored profile, or a clean one if the user was never scored.
    pub fn risk_profile(&self, user: UserId) -> Result<RiskProfile> {
        Ok(self
            .store
            .get::<RiskProfile>(user)?
            .unwrap_or_else(|| RiskProfile::clean(user, self.clock.now())))
    }

    pub fn validate_user_can_trade(&self, user: UserId) -> Result<()> {
        self.store
            .transaction(|tx| self.validate_user_can_trade_in(tx, user))
    }

    /// Reject suspended or critical users, and users over the order-rate or
    /// unpaid-order limits.
    pub fn validate_user_can_trade_in(&self, tx: &mut Tx<'_>, user: UserId) -> Result<()> {
        if let Some(profile) = tx.get::<RiskProfile>(user) {
            if profile.is_suspended {
                return Err(EscrowError::UserSuspended);
            }
            if profile.risk_level == RiskLevel::Critical {
                return Err(EscrowError::HighRisk {
                    score: profile.risk_score,
                });
            }
        }

        let since = self.clock.now() - Duration::minutes(self.config.order_rate_window_minutes);
        let orders = tx.scan::<Order>();
        let recent = orders
            .iter()
            .filter(|o| o.taker == user && o.created_at > since)
            .count();
        if recent >= self.config.max_orders_per_window {
            return Err(EscrowError::RateLimited {
                reason: format!(
                    "{recent} orders in the last {} minutes",
                    self.config.order_rate_window_minutes
                ),
            });
        }

        let unpaid = orders
            .iter()
            .filter(|o| o.buyer == user && o.status == OrderStatus::PendingPayment)
            .count();
        if unpaid >= self.config.max_unpaid_orders {
            return Err(EscrowError::RateLimited {
                reason: format!("{unpaid} unpaid orders outstanding"),
            });
        }
        Ok(())
    }

    /// Users with an order touched at or after `since`.
    pub fn active_users_since(&self, since: DateTime<Utc>) -> Result<BTreeSet<UserId>> {
        Ok(self
            .store
            .scan::<Order>()?
            .into_iter()
            .filter(|o| o.updated_at >= since)
            .flat_map(|o| [o.buyer, o.seller])
            .collect())
    }

    fn compute_in(
        &self,
        tx: &mut Tx<'_>,
        user: UserId,
        previous: Option<&RiskProfile>,
    ) -> RiskProfile {
        let now = self.clock.now();
        let orders: Vec<Order> = tx
            .scan::<Order>()
            .into_iter()
            .filter(|o| o.involves(user))
            .collect();

        let stats = order_stats(&orders);
        let (score, mut flags) = score(&stats);

        let day_ago = now - Duration::hours(24);
        let recent_cancellations = orders
            .iter()
            .filter(|o| {
                o.cancelled_by == Some(Actor::User(user))
                    && o.cancelled_at.is_some_and(|at| at > day_ago)
            })
            .count();
        if recent_cancellations >= self.config.excessive_cancellations_per_day {
            flags.push(RiskFlag::ExcessiveCancellations);
        }

        let risk_level = RiskLevel::from_score(score);
        let is_suspended = risk_level == RiskLevel::Critical;
        let suspended_at = if is_suspended {
            previous
                .and_then(|p| p.suspended_at)
                .or(Some(now))
        } else {
            None
        };

        RiskProfile {
            user_id: user,
            risk_score: score,
            risk_level,
            flags,
            is_suspended,
            suspended_at,
            stats,
            updated_at: now,
        }
    }
}

fn order_stats(orders: &[Order]) -> OrderStats {
    let mut stats = OrderStats::default();
    for order in orders {
        stats.total += 1;
        match order.status {
            OrderStatus::Completed => stats.completed += 1,
            OrderStatus::Cancelled | OrderStatus::Expired => stats.cancelled += 1,
            _ => {}
        }
        if order.dispute_id.is_some() {
            stats.disputed += 1;
        }
    }
    stats
}

fn percent(part: u64, total: u64) -> Decimal {
    Decimal::from(part) * Decimal::ONE_HUNDRED / Decimal::from(total)
}

/// Score and rate-based flags for `stats`.
pub fn score(stats: &OrderStats) -> (Decimal, Vec<RiskFlag>) {
    if stats.total == 0 {
        return (Decimal::ZERO, Vec::new());
    }
    let cancel_rate = percent(stats.cancelled, stats.total);
    let dispute_rate = percent(stats.disputed, stats.total);
    let completion_rate = percent(stats.completed, stats.total);

    let completion_gap = (COMPLETION_TARGET - completion_rate).max(Decimal::ZERO);
    let raw = cancel_rate.min(CANCEL_WEIGHT_CAP)
        + (dispute_rate * Decimal::new(15, 1)).min(DISPUTE_WEIGHT_CAP)
        + completion_gap / COMPLETION_TARGET * DISPUTE_WEIGHT_CAP;
    let score = raw.min(MAX_SCORE).round_dp(2);

    let mut flags = Vec::new();
    if cancel_rate > HIGH_CANCELLATION_RATE {
        flags.push(RiskFlag::HighCancellationRate);
    }
    if dispute_rate > HIGH_DISPUTE_RATE {
        flags.push(RiskFlag::HighDisputeRate);
    }
    if completion_rate < COMPLETION_TARGET {
        flags.push(RiskFlag::LowCompletionRate);
    }
    (score, flags)
}

#[cfg(test)]
mod tests {
    use openescrow_types::{DisputeId, ManualClock};

    use super::*;

    fn stats(total: u64, completed: u64, cancelled: u64, disputed: u64) -> OrderStats {
        OrderStats {
            total,
            completed,
            cancelled,
            disputed,
        }
    }

    #[test]
    fn clean_history_scores_zero() {
        let (s, flags) = score(&stats(10, 10, 0, 0));
        assert_eq!(s, Decimal::ZERO);
        assert!(flags.is_empty());
        assert_eq!(score(&stats(0, 0, 0, 0)).0, Decimal::ZERO);
    }

    #[test]
    fn four_of_ten_cancelled_is_high() {
        // 40 + 0 + (70 − 60) / 70 × 30 = 44.29
        let (s, flags) = score(&stats(10, 6, 4, 0));
        assert_eq!(s, Decimal::new(4429, 2));
        assert_eq!(RiskLevel::from_score(s), RiskLevel::High);
        assert!(flags.contains(&RiskFlag::HighCancellationRate));
        assert!(flags.contains(&RiskFlag::LowCompletionRate));
    }

    #[test]
    fn worst_case_is_critical_and_capped() {
        let (s, _) = score(&stats(4, 0, 2, 2));
        // 40 (50% capped) + 30 (75% capped) + 30 = 100
        assert_eq!(s, Decimal::ONE_HUNDRED);
        assert_eq!(RiskLevel::from_score(s), RiskLevel::Critical);
    }

    fn engine_with(orders: &[Order]) -> (FraudEngine, Arc<ManualClock>) {
        let store = Arc::new(Store::default());
        store
            .transaction(|tx| {
                for order in orders {
                    tx.put(order.clone());
                }
                Ok(())
            })
            .unwrap();
        let clock = Arc::new(ManualClock::default());
        let engine = FraudEngine::new(store, clock.clone(), RiskConfig::default());
        (engine, clock)
    }

    #[test]
    fn critical_user_is_suspended_and_blocked() {
        let user = UserId::new();
        let orders: Vec<Order> = (0..4)
            .map(|i| {
                let mut o = Order::dummy(user, UserId::new(), Decimal::ONE);
                o.status = OrderStatus::Cancelled;
                if i % 2 == 0 {
                    o.dispute_id = Some(DisputeId::new());
                }
                o
            })
            .collect();
        let (engine, _) = engine_with(&orders);
        let profile = engine.update_risk_profile(user).unwrap();
        assert!(profile.is_suspended);
        assert!(profile.suspended_at.is_some());
        assert!(matches!(
            engine.validate_user_can_trade(user).unwrap_err(),
            EscrowError::UserSuspended
        ));
    }

    #[test]
    fn high_is_not_suspended() {
        let user = UserId::new();
        let orders: Vec<Order> = (0..10)
            .map(|i| {
                let mut o = Order::dummy(UserId::new(), user, Decimal::ONE);
                o.status = if i < 4 { OrderStatus::Cancelled } else { OrderStatus::Completed };
                o
            })
            .collect();
        let (engine, _) = engine_with(&orders);
        let profile = engine.update_risk_profile(user).unwrap();
        assert_eq!(profile.risk_level, RiskLevel::High);
        assert!(!profile.is_suspended);
        assert_eq!(profile.stats.total, 10);
        engine.validate_user_can_trade(user).unwrap();
    }

    #[test]
    fn order_rate_limit() {
        let user = UserId::new();
        let orders: Vec<Order> = (0..5)
            .map(|_| {
                let mut o = Order::dummy(user, UserId::new(), Decimal::ONE);
                o.status = OrderStatus::Completed;
                o
            })
            .collect();
        let (engine, clock) = engine_with(&orders);
        assert!(matches!(
            engine.validate_user_can_trade(user).unwrap_err(),
            EscrowError::RateLimited { .. }
        ));
        clock.advance(Duration::minutes(11));
        engine.validate_user_can_trade(user).unwrap();
    }

    #[test]
    fn unpaid_order_limit() {
        let user = UserId::new();
        let orders: Vec<Order> = (0..3)
            .map(|_| {
                let mut o = Order::dummy(user, UserId::new(), Decimal::ONE);
                o.taker = UserId::new();
                o
            })
            .collect();
        let (engine, _) = engine_with(&orders);
        let err = engine.validate_user_can_trade(user).unwrap_err();
        assert!(err.to_string().contains("unpaid"));
    }

    #[test]
    fn excessive_cancellations_flagged() {
        let user = UserId::new();
        let now = Utc::now();
        let mut orders: Vec<Order> = (0..3)
            .map(|_| {
                let mut o = Order::dummy(user, UserId::new(), Decimal::ONE);
                o.status = OrderStatus::Cancelled;
                o.cancelled_by = Some(Actor::User(user));
                o.cancelled_at = Some(now);
                o
            })
            .collect();
        orders.extend((0..20).map(|_| {
            let mut o = Order::dummy(user, UserId::new(), Decimal::ONE);
            o.status = OrderStatus::Completed;
            o
        }));
        let (engine, _) = engine_with(&orders);
        let profile = engine.record_cancellation(user).unwrap();
        assert!(profile.has_flag(RiskFlag::ExcessiveCancellations));
        assert!(!profile.is_suspended);
    }
}
