//! System-wide constants for the OpenEscrow engine.

use rust_decimal::Decimal;

/// Decimal places allowed on crypto (internal accounting) amounts.
pub const CRYPTO_PRECISION: u32 = 8;

/// Decimal places allowed on fiat amounts.
pub const FIAT_PRECISION: u32 = 2;

/// Ceiling on any single amount or price accepted from a caller. Keeps
/// every sum and product the engine forms far below `Decimal::MAX`.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Shortest payment window an offer may advertise, in minutes.
pub const MIN_PAYMENT_WINDOW_MINUTES: u32 = 5;

/// Longest payment window an offer may advertise, in minutes.
pub const MAX_PAYMENT_WINDOW_MINUTES: u32 = 60;

/// Payment window used when an offer does not specify one.
pub const DEFAULT_PAYMENT_WINDOW_MINUTES: u32 = 15;

/// Grace period after the payment deadline before the sweep expires an order.
pub const DEFAULT_EXPIRY_BUFFER_MINUTES: i64 = 2;

/// Lifetime of an escrow lock before cleanup considers it stale.
pub const ESCROW_LOCK_TTL_HOURS: i64 = 24;

/// Maximum number of offers returned by `find_matches`.
pub const MAX_MATCH_RESULTS: usize = 10;

/// Completed trades sampled for price suggestion.
pub const PRICE_SAMPLE_SIZE: usize = 50;

/// Samples needed for a "high" confidence price suggestion.
pub const HIGH_CONFIDENCE_SAMPLES: usize = 30;

/// Samples needed for a "medium" confidence price suggestion.
pub const MEDIUM_CONFIDENCE_SAMPLES: usize = 10;

/// Orders a user may create inside the rate window.
pub const MAX_ORDERS_PER_WINDOW: usize = 5;

/// Trailing window for the order rate limit, in minutes.
pub const ORDER_RATE_WINDOW_MINUTES: i64 = 10;

/// Unpaid (pending-payment) orders a buyer may hold at once.
pub const MAX_UNPAID_ORDERS: usize = 3;

/// Cancellations inside 24 hours that raise the `excessive_cancellations` flag.
pub const EXCESSIVE_CANCELLATIONS_PER_DAY: usize = 3;

/// Validity of an approved KYC level.
pub const KYC_VALIDITY_DAYS: i64 = 365;

/// Interval between expired-order sweeps, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Interval between risk profile refreshes, in seconds.
pub const DEFAULT_RISK_REFRESH_INTERVAL_SECS: u64 = 3600;

/// Interval between escrow lock cleanups, in seconds.
pub const DEFAULT_ESCROW_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// Optimistic transaction attempts before surfacing a write conflict.
pub const DEFAULT_MAX_TX_RETRIES: usize = 16;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "OpenEscrow";

/// Page size used when a listing request does not specify one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page a listing request may ask for.
pub const MAX_PAGE_SIZE: usize = 100;
