//! KYC tier gate.
//!
//! Levels are approved strictly in order. A profile carries one expiry,
//! restamped on every approval; once it passes the profile can only renew
//! its current level.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use openescrow_store::{Store, Tx};
use openescrow_types::{
    Caller, Clock, EscrowError, KycAction, KycConfig, KycLevel, KycProfile, KycStatus, Result,
    UserId,
};
use rust_decimal::Decimal;
use tracing::{info, warn};

pub struct KycService {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    config: KycConfig,
}

impl KycService {
    #[must_use]
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, config: KycConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Submit documents for `level`. The level below must be approved and
    /// unexpired; an expired profile may only resubmit its current level.
    pub fn submit(&self, user: UserId, level: KycLevel, documents: Vec<String>) -> Result<KycProfile> {
        if documents.is_empty() || documents.iter().any(|d| d.trim().is_empty()) {
            return Err(EscrowError::InvalidRequest {
                reason: "at least one non-empty document is required".to_string(),
            });
        }
        let now = self.clock.now();
        let profile = self.store.transaction(|tx| {
            let mut profile = tx
                .get::<KycProfile>(user)
                .unwrap_or_else(|| KycProfile::unverified(user, now));

            if let Some(pending) = profile.pending_level {
                return Err(EscrowError::KycNotEligible {
                    reason: format!("{pending} submission already under review"),
                });
            }
            let Some(required) = level.previous() else {
                return Err(EscrowError::KycNotEligible {
                    reason: "level 0 is the baseline and cannot be submitted".to_string(),
                });
            };

            if profile.level > KycLevel::Level0 && profile.is_expired(now) {
                if level != profile.level {
                    return Err(EscrowError::KycNotEligible {
                        reason: format!("verification expired, renew {} first", profile.level),
                    });
                }
            } else if profile.level != required {
                return Err(EscrowError::KycNotEligible {
                    reason: format!("{level} requires {required}, current level is {}", profile.level),
                });
            }

            if profile.level == KycLevel::Level0 {
                profile.status = KycStatus::Pending;
            }
            profile.pending_level = Some(level);
            profile.documents = documents.clone();
            profile.rejection_reason = None;
            profile.updated_at = now;
            tx.put(profile.clone());
            Ok(profile)
        })?;

        info!(user = %user, level = %level, "kyc submission received");
        Ok(profile)
    }

    /// Approve the pending submission, stamping a fresh expiry.
    pub fn approve_level(&self, admin: &Caller, user: UserId) -> Result<KycProfile> {
        admin.require_admin()?;
        let now = self.clock.now();
        let expires_at = now + Duration::days(self.config.validity_days);
        let profile = self.store.transaction(|tx| {
            let mut profile = pending_profile_in(tx, user)?;
            let Some(level) = profile.pending_level.take() else {
                return Err(no_pending());
            };
            profile.level = level;
            profile.limits = level.limits();
            profile.status = KycStatus::Approved;
            profile.approved_at = Some(now);
            profile.expires_at = Some(expires_at);
            profile.updated_at = now;
            tx.put(profile.clone());
            Ok(profile)
        })?;

        info!(
            user = %user,
            level = %profile.level,
            admin = %admin.user_id,
            expires_at = %expires_at,
            "kyc level approved"
        );
        Ok(profile)
    }

    /// Reject the pending submission. The approved level is unchanged.
    pub fn reject_submission(&self, admin: &Caller, user: UserId, reason: &str) -> Result<KycProfile> {
        admin.require_admin()?;
        let now = self.clock.now();
        let profile = self.store.transaction(|tx| {
            let mut profile = pending_profile_in(tx, user)?;
            profile.pending_level = None;
            profile.rejection_reason = Some(reason.to_string());
            profile.status = if profile.level == KycLevel::Level0 {
                KycStatus::Rejected
            } else if profile.is_expired(now) {
                KycStatus::Expired
            } else {
                KycStatus::Approved
            };
            profile.updated_at = now;
            tx.put(profile.clone());
            Ok(profile)
        })?;

        warn!(user = %user, admin = %admin.user_id, reason, "kyc submission rejected");
        Ok(profile)
    }

    pub fn validate_action(&self, user: UserId, action: KycAction, amount: Decimal) -> Result<()> {
        self.store
            .transaction(|tx| self.validate_action_in(tx, user, action, amount))
    }

    /// Check that `user` may perform `action` for `amount` crypto units.
    pub fn validate_action_in(
        &self,
        tx: &mut Tx<'_>,
        user: UserId,
        action: KycAction,
        amount: Decimal,
    ) -> Result<()> {
        let now = self.clock.now();
        let profile = tx
            .get::<KycProfile>(user)
            .unwrap_or_else(|| KycProfile::unverified(user, now));

        if profile.level > KycLevel::Level0 && profile.is_expired(now) {
            return Err(EscrowError::KycExpired);
        }
        if profile.status != KycStatus::Approved {
            return Err(EscrowError::KycNotEligible {
                reason: format!("{action} requires approved verification, status is {}", profile.status),
            });
        }
        let permitted = match action {
            KycAction::Trade => profile.limits.can_trade,
            KycAction::Withdraw => profile.limits.can_withdraw,
        };
        if !permitted {
            return Err(EscrowError::KycNotEligible {
                reason: format!("{action} not permitted at {}", profile.level),
            });
        }
        if amount > profile.limits.max_order_size {
            return Err(EscrowError::LimitViolation {
                reason: format!(
                    "{amount} exceeds {} max order size {}",
                    profile.level, profile.limits.max_order_size
                ),
            });
        }
        Ok(())
    }

    /// The stored profile, or the level-0 baseline.
    pub fn profile(&self, user: UserId) -> Result<KycProfile> {
        Ok(self
            .store
            .get::<KycProfile>(user)?
            .unwrap_or_else(|| KycProfile::unverified(user, self.clock.now())))
    }

    /// Mark approved profiles past their expiry as expired.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<UserId>> {
        let expired = self.store.transaction(|tx| {
            let mut expired = Vec::new();
            for mut profile in tx.scan::<KycProfile>() {
                if profile.status == KycStatus::Approved
                    && profile.expires_at.is_some_and(|at| now > at)
                {
                    profile.status = KycStatus::Expired;
                    profile.updated_at = now;
                    expired.push(profile.user_id);
                    tx.put(profile);
                }
            }
            Ok(expired)
        })?;
        if !expired.is_empty() {
            info!(count = expired.len(), "kyc profiles expired");
        }
        Ok(expired)
    }
}

fn no_pending() -> EscrowError {
    EscrowError::KycNotEligible {
        reason: "no submission pending review".to_string(),
    }
}

fn pending_profile_in(tx: &mut Tx<'_>, user: UserId) -> Result<KycProfile> {
    tx.get::<KycProfile>(user)
        .filter(|p| p.pending_level.is_some())
        .ok_or_else(no_pending)
}
