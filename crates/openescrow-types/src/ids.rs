//! Globally unique identifiers used throughout OpenEscrow.
//!
//! All entity IDs use UUIDv7 for time-ordered lexicographic sorting, so
//! sorting by id is sorting by creation time.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a user. Supplied by the identity provider.
    UserId,
    ""
);

uuid_id!(
    /// Unique identifier for a standing buy/sell offer.
    OfferId,
    "offer:"
);

uuid_id!(
    /// Unique identifier for an order placed against an offer.
    OrderId,
    "order:"
);

uuid_id!(
    /// Unique identifier for a ledger log row.
    TransactionId,
    "tx:"
);

uuid_id!(
    /// Unique identifier for an escrow lock.
    EscrowLockId,
    "escrow:"
);

uuid_id!(
    /// Unique identifier for a dispute.
    DisputeId,
    "dispute:"
);

impl OrderId {
    /// Extract the embedded timestamp (milliseconds since UNIX epoch) from UUIDv7.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        let bytes = self.0.as_bytes();
        u64::from_be_bytes([
            0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
        ])
    }
}

/// A crypto/fiat trading pair, e.g. `USDT/NGN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TradingPair {
    pub asset: String,
    pub fiat: String,
}

impl TradingPair {
    #[must_use]
    pub fn new(asset: impl Into<String>, fiat: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            fiat: fiat.into(),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.asset, self.fiat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = OrderId::new();
        let b = OrderId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn order_id_timestamp_extraction() {
        let before = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let id = OrderId::new();
        let after = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let ts = id.timestamp_ms();
        assert!(ts >= before && ts <= after, "ts={ts}, before={before}, after={after}");
    }

    #[test]
    fn display_prefixes() {
        let id = OfferId::from_bytes([0u8; 16]);
        assert!(id.to_string().starts_with("offer:"));
        let user = UserId::from_bytes([0u8; 16]);
        assert!(!user.to_string().contains(':'));
    }

    #[test]
    fn trading_pair_display() {
        assert_eq!(TradingPair::new("USDT", "NGN").to_string(), "USDT/NGN");
    }
}
