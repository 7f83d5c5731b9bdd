//! Query Facade
//!
//! [`Parser`] is the object callers hold: the HTTP server and tests build one
//! at startup and share it by `Arc`. It owns the transaction store and the
//! subscription manager and adds nothing but delegation.

use std::sync::Arc;

use alloy::primitives::Address;

use crate::decoder::Transaction;
use crate::source::LogSource;
use crate::store::TransactionStore;
use crate::subscription::{Subscription, SubscriptionManager};

/// Returned by [`Parser::get_current_block`] before any transfer was observed
pub const NO_BLOCK: i64 = -1;

pub struct Parser {
    store: Arc<TransactionStore>,
    subscriptions: SubscriptionManager,
}

impl Parser {
    /// Create a parser with an empty store reading from `source`
    pub fn new(source: Arc<dyn LogSource>) -> Self {
        Self::with_store(source, Arc::new(TransactionStore::new()))
    }

    pub fn with_store(source: Arc<dyn LogSource>, store: Arc<TransactionStore>) -> Self {
        Self {
            subscriptions: SubscriptionManager::new(source, Arc::clone(&store)),
            store,
        }
    }

    /// Last block that contained an observed transfer, or [`NO_BLOCK`]
    pub fn get_current_block(&self) -> i64 {
        self.store
            .current_block()
            .map_or(NO_BLOCK, |block| i64::try_from(block).unwrap_or(i64::MAX))
    }

    /// Add `address` to the watched set
    pub async fn subscribe(&self, address: Address) -> bool {
        self.subscriptions.subscribe(address).await
    }

    /// Remove `address` from the watched set
    pub async fn unsubscribe(&self, address: Address) -> bool {
        self.subscriptions.unsubscribe(address).await
    }

    /// Inbound and outbound transfers of `address`, oldest first
    pub fn get_transactions(&self, address: &Address) -> Vec<Transaction> {
        self.store.transactions_for(address)
    }

    pub async fn subscription(&self, address: Address) -> Option<Subscription> {
        self.subscriptions.subscription(address).await
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.subscriptions().await
    }

    pub fn store(&self) -> &Arc<TransactionStore> {
        &self.store
    }

    /// Stop all ingestion loops
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await
    }
}
