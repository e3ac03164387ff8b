//! # openescrow-trade
//!
//! **Escrowed trades**: the order lifecycle and everything that settles it.
//!
//! An order locks the seller's crypto when it is created, and the lock is
//! the only way funds leave the seller before completion. Every exit from
//! the lifecycle settles the lock exactly once:
//!
//! ```text
//!   PendingPayment ──paid──▶ AwaitingRelease ──release──▶ Completed
//!        │   │                    │     │                    ▲
//!        │   └──expire──▶ Expired │     └──dispute──▶ Disputed┘ (resolve)
//!        └──cancel──▶ Cancelled ◀─┘
//! ```
//!
//! ## Components
//!
//! - [`OrderService`]: create, pay, release, cancel, expire, auto-match
//! - [`DisputeService`]: open, evidence, admin resolution
//! - [`PaymentService`]: gateway deposits and withdrawals
//! - [`Scheduler`]: expiry sweep, risk refresh, stale escrow cleanup, KYC expiry
//! - [`Engine`]: the [`Command`] boundary with caller authentication
//! - [`Notifier`]: best-effort delivery of lifecycle events

pub mod auto_match;
pub mod disputes;
pub mod engine;
mod escrow;
pub mod logging;
pub mod notify;
pub mod orders;
pub mod payments;
pub mod scheduler;
pub mod services;

pub use disputes::DisputeService;
pub use engine::{Command, Engine};
pub use logging::{LogFormat, init_logging};
pub use notify::{LogNotifier, Notification, NotificationKind, Notifier, RecordingNotifier};
pub use orders::{NewOrder, OrderQuery, OrderService, PriceGuard};
pub use payments::{DepositVerification, PaymentService, WithdrawalRequest};
pub use scheduler::{JobReport, Scheduler};
pub use services::Services;
