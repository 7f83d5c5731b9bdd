//! Transaction Store
//!
//! Append-only, in-memory log of decoded transfers plus the highest block
//! number observed so far. Shared by every ingestion loop and every query.
//!
//! All mutation happens under a short write lock (push + marker update);
//! decoding is done by callers before they get here. Readers take the read
//! lock only long enough to copy out what they need.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use alloy::primitives::Address;

use crate::decoder::Transaction;

#[derive(Debug, Default)]
struct StoreState {
    transactions: Vec<Transaction>,
    current_block: Option<u64>,
}

/// Point-in-time view of the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Every stored transaction in arrival order
    pub transactions: Vec<Transaction>,
    /// Highest block number among `transactions`, `None` if empty
    pub current_block: Option<u64>,
}

/// Concurrency-safe transaction log
#[derive(Debug, Default)]
pub struct TransactionStore {
    state: RwLock<StoreState>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction and advance the block marker
    ///
    /// The marker only moves forward, so out-of-order blocks never lower it.
    pub fn append(&self, tx: Transaction) {
        let mut state = self.write();
        let block = state
            .current_block
            .map_or(tx.block_number, |current| current.max(tx.block_number));
        state.current_block = Some(block);
        state.transactions.push(tx);
    }

    /// Highest block seen in any stored transaction, `None` before the first append
    pub fn current_block(&self) -> Option<u64> {
        self.read().current_block
    }

    /// Consistent copy of all transactions and the block marker
    pub fn snapshot(&self) -> Snapshot {
        let state = self.read();
        Snapshot {
            transactions: state.transactions.clone(),
            current_block: state.current_block,
        }
    }

    /// Transactions sent or received by `address`, in arrival order
    pub fn transactions_for(&self, address: &Address) -> Vec<Transaction> {
        self.read()
            .transactions
            .iter()
            .filter(|tx| tx.involves(address))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic cannot leave StoreState half-updated: the push is the last step
    // of append, so a poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
