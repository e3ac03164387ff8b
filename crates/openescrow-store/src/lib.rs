//! # openescrow-store
//!
//! In-memory transactional store backing every OpenEscrow service.
//!
//! - [`Store`]: optimistic, versioned, retry-on-conflict transactions
//! - [`Tx`]: the handle a transaction closure reads and writes through
//! - [`Record`]: entities that own a table (wallets, log rows, offers,
//!   orders, escrow locks, disputes, risk and KYC profiles)
//! - [`chain`]: SHA-256 hash chain over the append-only ledger log
//! - [`SupplyTotals`]: running deposit/withdrawal/fee totals used by the
//!   conservation check

pub mod chain;
pub mod store;
pub mod table;

pub use store::{Store, SupplyTotals, Tx};
pub use table::Record;
