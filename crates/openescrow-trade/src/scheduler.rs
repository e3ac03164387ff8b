//! Periodic maintenance jobs.
//!
//! Every job is a batch of independent items: each item runs in its own
//! transaction, re-checks its precondition there, and is skipped when it no
//! longer applies. A failing item is logged and the batch continues, so jobs
//! are safe to re-run and to overlap with user traffic.
//!
//! | Job                     | Default interval | Scope                                      |
//! |-------------------------|------------------|--------------------------------------------|
//! | `sweep_expired_orders`  | 5 min            | unpaid orders past deadline + buffer       |
//! | `refresh_risk_profiles` | 1 h              | users with orders touched in the window    |
//! | `cleanup_escrow_locks`  | 1 h              | locked escrow past its TTL                 |
//! | `expire_kyc`            | 1 h              | approved KYC past its expiry               |

use std::sync::Arc;

use chrono::Duration;
use openescrow_ledger::Memo;
use openescrow_types::{EscrowLock, Order, OrderStatus, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::orders::OrderService;
use crate::services::Services;

/// Outcome of one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job: String,
    /// Items the job looked at.
    pub examined: usize,
    /// Items changed.
    pub applied: usize,
    /// Items left alone because their state moved on.
    pub skipped: usize,
    pub failed: usize,
}

impl JobReport {
    fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            ..Self::default()
        }
    }

    fn record<T>(&mut self, outcome: Result<Option<T>>, item: &dyn std::fmt::Display) {
        self.examined += 1;
        match outcome {
            Ok(Some(_)) => self.applied += 1,
            Ok(None) => self.skipped += 1,
            Err(err) => {
                self.failed += 1;
                warn!(job = %self.job, item = %item, error = %err, "scheduled job item failed");
            }
        }
    }

    fn log(&self) {
        if self.examined > 0 {
            info!(
                job = %self.job,
                examined = self.examined,
                applied = self.applied,
                skipped = self.skipped,
                failed = self.failed,
                "scheduled job finished"
            );
        } else {
            debug!(job = %self.job, "scheduled job found nothing to do");
        }
    }
}

pub struct Scheduler {
    svc: Arc<Services>,
    orders: Arc<OrderService>,
}

impl Scheduler {
    #[must_use]
    pub fn new(svc: Arc<Services>, orders: Arc<OrderService>) -> Self {
        Self { svc, orders }
    }

    /// Expire unpaid orders whose deadline plus buffer has passed.
    pub fn sweep_expired_orders(&self) -> Result<JobReport> {
        let now = self.svc.clock.now();
        let buffer = Duration::minutes(self.svc.config.orders.expiry_buffer_minutes);
        let mut report = JobReport::new("sweep_expired_orders");
        let due: Vec<Order> = self
            .svc
            .store
            .scan::<Order>()?
            .into_iter()
            .filter(|o| o.status == OrderStatus::PendingPayment && o.is_past_deadline(now, buffer))
            .collect();
        for order in due {
            report.record(self.orders.expire_order(order.id), &order.id);
        }
        report.log();
        Ok(report)
    }

    /// Recompute risk for every user with recent order activity.
    pub fn refresh_risk_profiles(&self) -> Result<JobReport> {
        let since = self.svc.clock.now() - Duration::hours(self.svc.config.risk.refresh_window_hours);
        let mut report = JobReport::new("refresh_risk_profiles");
        for user in self.svc.fraud.active_users_since(since)? {
            report.record(self.svc.fraud.update_risk_profile(user).map(Some), &user);
        }
        report.log();
        Ok(report)
    }

    /// Refund escrow locks past their TTL whose order is finished or gone.
    /// Locks on live orders are reported and left for the order flow.
    pub fn cleanup_escrow_locks(&self) -> Result<JobReport> {
        let now = self.svc.clock.now();
        let mut report = JobReport::new("cleanup_escrow_locks");
        let stale: Vec<EscrowLock> = self
            .svc
            .store
            .scan::<EscrowLock>()?
            .into_iter()
            .filter(|l| l.is_locked() && l.is_expired(now))
            .collect();
        for candidate in stale {
            let outcome = self.svc.store.transaction(|tx| {
                let Some(mut lock) = tx.get::<EscrowLock>(candidate.id) else {
                    return Ok(None);
                };
                if !lock.is_locked() {
                    return Ok(None);
                }
                let order = tx.get::<Order>(lock.order_id);
                if let Some(order) = order.as_ref().filter(|o| !o.is_terminal()) {
                    warn!(
                        escrow_id = %lock.id,
                        order_id = %order.id,
                        status = %order.status,
                        "escrow lock past ttl on a live order, left in place"
                    );
                    return Ok(None);
                }
                self.svc.ledger.unlock_in(
                    tx,
                    lock.owner,
                    lock.amount,
                    Memo::new("stale escrow refund").order(lock.order_id),
                )?;
                lock.mark_refunded(now)?;
                tx.put(lock.clone());
                if let Some(mut order) = order.filter(|o| o.escrow_lock_id == Some(lock.id)) {
                    order.escrow_locked = false;
                    order.updated_at = now;
                    tx.put(order);
                }
                Ok(Some(lock))
            });
            if let Ok(Some(refunded)) = &outcome {
                warn!(escrow_id = %refunded.id, owner = %refunded.owner, amount = %refunded.amount, "stale escrow lock refunded");
            }
            report.record(outcome, &candidate.id);
        }
        report.log();
        Ok(report)
    }

    /// Move approved KYC profiles past their expiry to expired.
    pub fn expire_kyc(&self) -> Result<JobReport> {
        let mut report = JobReport::new("expire_kyc");
        let expired = self.svc.kyc.expire_stale(self.svc.clock.now())?;
        report.examined = expired.len();
        report.applied = expired.len();
        report.log();
        Ok(report)
    }

    /// Run every job once.
    pub fn run_all(&self) -> Vec<JobReport> {
        let jobs: [(&str, fn(&Self) -> Result<JobReport>); 4] = [
            ("sweep_expired_orders", Self::sweep_expired_orders),
            ("refresh_risk_profiles", Self::refresh_risk_profiles),
            ("cleanup_escrow_locks", Self::cleanup_escrow_locks),
            ("expire_kyc", Self::expire_kyc),
        ];
        jobs.into_iter()
            .filter_map(|(name, job)| match job(self) {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(job = name, error = %err, "scheduled job aborted");
                    None
                }
            })
            .collect()
    }

    /// Drive the jobs on their intervals until `shutdown` flips to `true`
    /// or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let cfg = &self.svc.config.scheduler;
        let mut sweep = tokio::time::interval(secs(cfg.sweep_interval_secs));
        let mut risk = tokio::time::interval(secs(cfg.risk_refresh_interval_secs));
        let mut cleanup = tokio::time::interval(secs(cfg.escrow_cleanup_interval_secs));
        for interval in [&mut sweep, &mut risk, &mut cleanup] {
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        }
        info!(
            sweep_secs = cfg.sweep_interval_secs,
            risk_secs = cfg.risk_refresh_interval_secs,
            cleanup_secs = cfg.escrow_cleanup_interval_secs,
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = sweep.tick() => log_abort(self.sweep_expired_orders()),
                _ = risk.tick() => log_abort(self.refresh_risk_profiles()),
                _ = cleanup.tick() => {
                    log_abort(self.cleanup_escrow_locks());
                    log_abort(self.expire_kyc());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}

fn log_abort(outcome: Result<JobReport>) {
    if let Err(err) = outcome {
        warn!(error = %err, "scheduled job aborted");
    }
}

fn secs(n: u64) -> std::time::Duration {
    std::time::Duration::from_secs(n.max(1))
}
