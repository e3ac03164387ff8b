//! # openescrow-ledger
//!
//! The wallet ledger for OpenEscrow.
//!
//! - [`Ledger`]: credit, debit, fee, lock, unlock, and release, each one
//!   atomic store transaction appending hash-chained log rows
//! - [`supply`]: the conservation check
//!   `Σ(balance + locked) == deposits − withdrawals − fees`

pub mod ledger;
pub mod supply;

pub use ledger::{Ledger, Memo};
pub use supply::SupplyReport;
