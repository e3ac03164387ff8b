//! Hash chain over the ledger log.
//!
//! Each row's `entry_hash` is `SHA-256(domain || prev_hash || immutable
//! fields)`. `status` is excluded: it is the only field allowed to change
//! after the row is written.

use openescrow_types::{EscrowError, Result, Transaction};
use sha2::{Digest, Sha256};

/// `prev_hash` of the first row.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Compute the hex entry hash of `row` from its `prev_hash` and immutable fields.
#[must_use]
pub fn entry_hash(row: &Transaction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"openescrow:log:v1:");
    hasher.update(row.prev_hash.as_bytes());
    hasher.update(row.sequence.to_le_bytes());
    hasher.update(row.id.0.as_bytes());
    hasher.update(row.user_id.0.as_bytes());
    hasher.update(row.kind.to_string().as_bytes());
    for amount in [
        row.amount,
        row.balance_before,
        row.balance_after,
        row.locked_before,
        row.locked_after,
    ] {
        hasher.update(amount.normalize().to_string().as_bytes());
        hasher.update(b"|");
    }
    if let Some(order_id) = row.order_id {
        hasher.update(order_id.0.as_bytes());
    }
    if let Some(offer_id) = row.offer_id {
        hasher.update(offer_id.0.as_bytes());
    }
    if let Some(reference) = &row.reference {
        hasher.update(reference.as_bytes());
    }
    hasher.update(row.description.as_bytes());
    hasher.update(row.created_at.timestamp_micros().to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Check that `rows` (in sequence order) form an unbroken chain from genesis.
pub fn verify_chain(rows: &[Transaction]) -> Result<()> {
    let mut prev = GENESIS_HASH.to_string();
    for (index, row) in rows.iter().enumerate() {
        let expected_sequence = index as u64 + 1;
        if row.sequence != expected_sequence {
            return Err(EscrowError::Internal(format!(
                "log sequence gap: expected {expected_sequence}, found {}",
                row.sequence
            )));
        }
        if row.prev_hash != prev {
            return Err(EscrowError::Internal(format!(
                "log chain broken at sequence {}",
                row.sequence
            )));
        }
        if entry_hash(row) != row.entry_hash {
            return Err(EscrowError::Internal(format!(
                "log entry {} hash mismatch at sequence {}",
                row.id, row.sequence
            )));
        }
        prev.clone_from(&row.entry_hash);
    }
    Ok(())
}
