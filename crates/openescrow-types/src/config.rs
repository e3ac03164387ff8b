//! Engine configuration.
//!
//! Every section has defaults from [`crate::constants`]; a JSON document
//! only needs to carry the fields it overrides.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EscrowError, Result, constants};

/// Top-level configuration for an engine instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub orders: OrderConfig,
    pub risk: RiskConfig,
    pub matching: MatchingConfig,
    pub kyc: KycConfig,
    pub payments: PaymentConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EscrowError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break lifecycle invariants.
    pub fn validate(&self) -> Result<()> {
        let o = &self.orders;
        if o.min_payment_window_minutes == 0
            || o.min_payment_window_minutes > o.max_payment_window_minutes
        {
            return Err(EscrowError::Configuration(format!(
                "payment window bounds {}..={} are invalid",
                o.min_payment_window_minutes, o.max_payment_window_minutes
            )));
        }
        if o.expiry_buffer_minutes < 0 || o.escrow_lock_ttl_hours <= 0 {
            return Err(EscrowError::Configuration(
                "expiry buffer must be >= 0 and escrow ttl > 0".to_string(),
            ));
        }
        if self.matching.max_results == 0 || self.matching.price_sample_size == 0 {
            return Err(EscrowError::Configuration(
                "matching limits must be positive".to_string(),
            ));
        }
        if self.matching.depth_bucket <= Decimal::ZERO {
            return Err(EscrowError::Configuration(
                "depth bucket must be positive".to_string(),
            ));
        }
        if self.payments.withdrawal_fee < Decimal::ZERO
            || self.payments.withdrawal_fee > constants::MAX_AMOUNT
        {
            return Err(EscrowError::Configuration(format!(
                "withdrawal fee must be between 0 and {}",
                constants::MAX_AMOUNT
            )));
        }
        if self.store.max_tx_retries == 0 {
            return Err(EscrowError::Configuration(
                "store needs at least one transaction attempt".to_string(),
            ));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(EscrowError::Configuration(
                "sweep interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    pub min_payment_window_minutes: u32,
    pub max_payment_window_minutes: u32,
    /// Grace after the payment deadline before the sweep expires an order.
    pub expiry_buffer_minutes: i64,
    pub escrow_lock_ttl_hours: i64,
    /// Require an approved KYC `trade` permission to place orders.
    pub require_kyc_for_trading: bool,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            min_payment_window_minutes: constants::MIN_PAYMENT_WINDOW_MINUTES,
            max_payment_window_minutes: constants::MAX_PAYMENT_WINDOW_MINUTES,
            expiry_buffer_minutes: constants::DEFAULT_EXPIRY_BUFFER_MINUTES,
            escrow_lock_ttl_hours: constants::ESCROW_LOCK_TTL_HOURS,
            require_kyc_for_trading: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_orders_per_window: usize,
    pub order_rate_window_minutes: i64,
    pub max_unpaid_orders: usize,
    pub excessive_cancellations_per_day: usize,
    /// Users whose orders changed within this window are refreshed.
    pub refresh_window_hours: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_orders_per_window: constants::MAX_ORDERS_PER_WINDOW,
            order_rate_window_minutes: constants::ORDER_RATE_WINDOW_MINUTES,
            max_unpaid_orders: constants::MAX_UNPAID_ORDERS,
            excessive_cancellations_per_day: constants::EXCESSIVE_CANCELLATIONS_PER_DAY,
            refresh_window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub max_results: usize,
    pub price_sample_size: usize,
    /// Width of a market-depth price bucket, in fiat.
    pub depth_bucket: Decimal,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_results: constants::MAX_MATCH_RESULTS,
            price_sample_size: constants::PRICE_SAMPLE_SIZE,
            depth_bucket: Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KycConfig {
    pub validity_days: i64,
}

impl Default for KycConfig {
    fn default() -> Self {
        Self {
            validity_days: constants::KYC_VALIDITY_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Flat fee charged on each withdrawal, in crypto units.
    pub withdrawal_fee: Decimal,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            withdrawal_fee: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sweep_interval_secs: u64,
    pub risk_refresh_interval_secs: u64,
    pub escrow_cleanup_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: constants::DEFAULT_SWEEP_INTERVAL_SECS,
            risk_refresh_interval_secs: constants::DEFAULT_RISK_REFRESH_INTERVAL_SECS,
            escrow_cleanup_interval_secs: constants::DEFAULT_ESCROW_CLEANUP_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_tx_retries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_tx_retries: constants::DEFAULT_MAX_TX_RETRIES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.orders.min_payment_window_minutes, 5);
        assert_eq!(cfg.orders.max_payment_window_minutes, 60);
        assert_eq!(cfg.orders.escrow_lock_ttl_hours, 24);
        assert_eq!(cfg.scheduler.sweep_interval_secs, 300);
    }

    #[test]
    fn partial_json_overrides() {
        let cfg = EngineConfig::from_json_str(
            r#"{"orders": {"expiry_buffer_minutes": 10}, "payments": {"withdrawal_fee": "0.5"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.orders.expiry_buffer_minutes, 10);
        assert_eq!(cfg.orders.max_payment_window_minutes, 60);
        assert_eq!(cfg.payments.withdrawal_fee, Decimal::new(5, 1));
    }

    #[test]
    fn inverted_window_rejected() {
        let err = EngineConfig::from_json_str(
            r#"{"orders": {"min_payment_window_minutes": 30, "max_payment_window_minutes": 10}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, EscrowError::Configuration(_)));
    }

    #[test]
    fn oversized_withdrawal_fee_rejected() {
        let err = EngineConfig::from_json_str(
            r#"{"payments": {"withdrawal_fee": "79228162514264337593543950335"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, EscrowError::Configuration(_)));
    }

    #[test]
    fn malformed_json_is_configuration_error() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, EscrowError::Configuration(_)));
    }
}
