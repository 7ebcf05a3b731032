// Pending transaction pool

use crate::core::{Hash256, Transaction};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Transactions received but not yet mined, keyed by ID.
///
/// Iteration follows ID order so every node drains the same pool the same way.
#[derive(Default)]
pub struct Mempool {
    transactions: Mutex<BTreeMap<Hash256, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self) -> MutexGuard<'_, BTreeMap<Hash256, Transaction>> {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `tx`, replacing a pending copy with the same ID.
    /// Returns true if the ID was not pending before.
    pub fn add(&self, tx: Transaction) -> bool {
        log::debug!("Mempool accepted {}", tx.id);
        self.pool().insert(tx.id, tx).is_none()
    }

    pub fn remove(&self, id: &Hash256) -> Option<Transaction> {
        self.pool().remove(id)
    }

    /// Drop every ID in `ids`
    pub fn remove_all<'a>(&self, ids: impl IntoIterator<Item = &'a Hash256>) {
        let mut pool = self.pool();
        for id in ids {
            pool.remove(id);
        }
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.pool().contains_key(id)
    }

    pub fn get(&self, id: &Hash256) -> Option<Transaction> {
        self.pool().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.pool().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool().is_empty()
    }

    /// Copy of every pending transaction in ID order
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.pool().values().cloned().collect()
    }

    /// Take every pending transaction out of the pool, in ID order
    pub fn drain(&self) -> Vec<Transaction> {
        std::mem::take(&mut *self.pool()).into_values().collect()
    }
}
