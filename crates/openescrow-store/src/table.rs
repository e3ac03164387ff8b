//! Versioned tables and the per-transaction staging area.
//!
//! Every committed row carries the commit number that last wrote it. A
//! transaction remembers the version of each row it read; at commit the
//! versions are compared against the live table. Scans remember the
//! table-wide version instead, so a concurrent insert also invalidates them.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

use openescrow_types::{
    Dispute, DisputeId, EscrowLock, EscrowLockId, KycProfile, Offer, OfferId, Order, OrderId,
    RiskProfile, Transaction, TransactionId, UserId, Wallet,
};

/// Version recorded for a key that was read but did not exist.
pub(crate) const ABSENT: u64 = 0;

#[derive(Debug, Clone)]
pub(crate) struct Versioned<V> {
    pub(crate) version: u64,
    pub(crate) value: V,
}

/// One keyed table. Rows iterate in key order; ids are UUIDv7 so that is
/// creation order.
#[derive(Debug)]
pub struct Table<K, V> {
    rows: BTreeMap<K, Versioned<V>>,
    version: u64,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            version: ABSENT,
        }
    }
}

impl<K: Ord + Copy, V: Clone> Table<K, V> {
    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        self.rows.get(key).map(|row| &row.value)
    }

    pub(crate) fn version_of(&self, key: &K) -> u64 {
        self.rows.get(key).map_or(ABSENT, |row| row.version)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.values().map(|row| &row.value)
    }

    pub(crate) fn upsert(&mut self, key: K, value: V, commit: u64) {
        self.rows.insert(key, Versioned { version: commit, value });
        self.version = commit;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reads and writes of one table inside a single transaction attempt.
#[derive(Debug)]
pub struct Staged<K, V> {
    reads: HashMap<K, u64>,
    writes: BTreeMap<K, V>,
    scanned: Option<u64>,
}

impl<K, V> Default for Staged<K, V> {
    fn default() -> Self {
        Self {
            reads: HashMap::new(),
            writes: BTreeMap::new(),
            scanned: None,
        }
    }
}

impl<K: Ord + Hash + Copy, V: Clone> Staged<K, V> {
    pub(crate) fn read(&mut self, table: &Table<K, V>, key: K) -> Option<V> {
        if let Some(value) = self.writes.get(&key) {
            return Some(value.clone());
        }
        self.reads.entry(key).or_insert_with(|| table.version_of(&key));
        table.get(&key).cloned()
    }

    pub(crate) fn write(&mut self, key: K, value: V) {
        self.writes.insert(key, value);
    }

    pub(crate) fn scan(&mut self, table: &Table<K, V>, key_of: impl Fn(&V) -> K) -> Vec<V> {
        self.scanned.get_or_insert(table.version);
        let mut merged: BTreeMap<K, V> = table
            .values()
            .map(|value| (key_of(value), value.clone()))
            .collect();
        for (key, value) in &self.writes {
            merged.insert(*key, value.clone());
        }
        merged.into_values().collect()
    }

    pub(crate) fn is_valid_against(&self, table: &Table<K, V>) -> bool {
        if self.scanned.is_some_and(|seen| seen != table.version) {
            return false;
        }
        self.reads
            .iter()
            .all(|(key, seen)| table.version_of(key) == *seen)
    }

    pub(crate) fn apply(self, table: &mut Table<K, V>, commit: u64) -> usize {
        let written = self.writes.len();
        for (key, value) in self.writes {
            table.upsert(key, value, commit);
        }
        written
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// An entity that lives in its own store table.
///
/// Implemented inside this crate for every persisted entity; the table
/// accessors are plumbing for [`crate::Tx`] and [`crate::Store`].
pub trait Record: Clone + Send + Sync + 'static {
    type Key: Copy + Ord + Hash + Debug + Send + Sync + 'static;

    /// Table name, for logs.
    const TABLE: &'static str;

    fn key(&self) -> Self::Key;

    #[doc(hidden)]
    fn table(tables: &Tables) -> &Table<Self::Key, Self>;

    #[doc(hidden)]
    fn staged(staged: &mut StagedTables) -> &mut Staged<Self::Key, Self>;
}

macro_rules! tables {
    ($($field:ident: $record:ty => $key:ty, $key_field:ident;)+) => {
        /// All committed tables.
        #[derive(Debug, Default)]
        pub struct Tables {
            $(pub(crate) $field: Table<$key, $record>,)+
        }

        /// Staged reads and writes for every table.
        #[derive(Debug, Default)]
        pub struct StagedTables {
            $(pub(crate) $field: Staged<$key, $record>,)+
        }

        impl StagedTables {
            pub(crate) fn is_valid_against(&self, tables: &Tables) -> bool {
                true $(&& self.$field.is_valid_against(&tables.$field))+
            }

            pub(crate) fn apply(self, tables: &mut Tables, commit: u64) -> usize {
                0 $(+ self.$field.apply(&mut tables.$field, commit))+
            }

            pub(crate) fn is_empty(&self) -> bool {
                true $(&& self.$field.is_empty())+
            }
        }

        $(
            impl Record for $record {
                type Key = $key;
                const TABLE: &'static str = stringify!($field);

                fn key(&self) -> $key {
                    self.$key_field
                }

                fn table(tables: &Tables) -> &Table<$key, Self> {
                    &tables.$field
                }

                fn staged(staged: &mut StagedTables) -> &mut Staged<$key, Self> {
                    &mut staged.$field
                }
            }
        )+
    };
}

tables! {
    wallets: Wallet => UserId, user_id;
    transactions: Transaction => TransactionId, id;
    offers: Offer => OfferId, id;
    orders: Order => OrderId, id;
    escrow_locks: EscrowLock => EscrowLockId, id;
    disputes: Dispute => DisputeId, id;
    risk_profiles: RiskProfile => UserId, user_id;
    kyc_profiles: KycProfile => UserId, user_id;
}
