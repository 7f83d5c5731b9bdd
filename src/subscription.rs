//! Subscription Manager
//!
//! Keeps one subscription per watched address. Each active subscription owns
//! a filtered [`LogStream`] and a tokio task that decodes its events and
//! appends transfers to the shared [`TransactionStore`].
//!
//! Lifecycle per address: `Unsubscribed -> Active -> {Stopped, Failed}`.
//! A stopped or failed address can be subscribed again, which starts a fresh
//! stream and loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy::primitives::Address;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::decoder::{decode_transfer, DecodeError, RawLogEvent, Transaction};
use crate::source::{LogSource, LogStream, SourceError};
use crate::store::TransactionStore;

/// Lifecycle state of a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Stopped,
    Failed(String),
}

impl SubscriptionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }

    /// Lower-case name without the failure reason
    pub fn name(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Stopped => "stopped",
            SubscriptionStatus::Failed(_) => "failed",
        }
    }
}

/// Observable state of one watched address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub address: Address,
    pub status: SubscriptionStatus,
    /// Most recent decode or stream error
    pub last_error: Option<String>,
    /// Raw events received from the stream
    pub events_received: u64,
    /// Decoded transfers appended to the store
    pub transfers_stored: u64,
    /// Transfer events dropped because their payload was malformed
    pub decode_failures: u64,
}

impl Subscription {
    fn new(address: Address, status: SubscriptionStatus) -> Self {
        Self {
            address,
            status,
            last_error: None,
            events_received: 0,
            transfers_stored: 0,
            decode_failures: 0,
        }
    }

    fn failed(address: Address, error: &SourceError) -> Self {
        Self {
            last_error: Some(error.to_string()),
            ..Self::new(address, SubscriptionStatus::Failed(error.to_string()))
        }
    }
}

type SharedState = Arc<Mutex<Subscription>>;

fn lock(state: &SharedState) -> MutexGuard<'_, Subscription> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SubscriptionHandle {
    state: SharedState,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    fn snapshot(&self) -> Subscription {
        lock(&self.state).clone()
    }
}

/// Registry of per-address subscriptions
pub struct SubscriptionManager {
    source: Arc<dyn LogSource>,
    store: Arc<TransactionStore>,
    // Never held across an await on the log source
    registry: AsyncMutex<HashMap<Address, SubscriptionHandle>>,
    // Serializes subscribe/unsubscribe of one address, so concurrent
    // subscribes cannot start two loops. Other addresses are not blocked.
    lifecycle: AsyncMutex<HashMap<Address, Arc<AsyncMutex<()>>>>,
}

impl SubscriptionManager {
    pub fn new(source: Arc<dyn LogSource>, store: Arc<TransactionStore>) -> Self {
        Self {
            source,
            store,
            registry: AsyncMutex::new(HashMap::new()),
            lifecycle: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn lifecycle_guard(&self, address: Address) -> OwnedMutexGuard<()> {
        let slot = Arc::clone(self.lifecycle.lock().await.entry(address).or_default());
        slot.lock_owned().await
    }

    /// Start watching `address`
    ///
    /// Opening the stream may take up to the source's connect timeout; only
    /// other lifecycle calls for the same address wait on it.
    ///
    /// # Returns
    /// `true` if the address is now (or already was) actively ingested,
    /// `false` if the log source could not be reached. The failure is kept as
    /// the subscription's `Failed` status.
    pub async fn subscribe(&self, address: Address) -> bool {
        let _guard = self.lifecycle_guard(address).await;

        if let Some(existing) = self.registry.lock().await.get(&address) {
            if existing.snapshot().status.is_active() {
                debug!(%address, "Already subscribed");
                return true;
            }
        }

        info!(%address, "Opening filtered log stream");
        let (handle, subscribed) = match self.source.open_filtered_stream(&[address]).await {
            Ok(stream) => {
                let state = Arc::new(Mutex::new(Subscription::new(
                    address,
                    SubscriptionStatus::Active,
                )));
                let (cancel, cancelled) = watch::channel(false);
                let task = tokio::spawn(ingest(
                    address,
                    stream,
                    cancelled,
                    Arc::clone(&self.store),
                    Arc::clone(&state),
                ));
                let handle = SubscriptionHandle {
                    state,
                    cancel,
                    task: Some(task),
                };
                (handle, true)
            }
            Err(e) => {
                error!(%address, error = %e, "Failed to open log stream");
                let (cancel, _) = watch::channel(true);
                let handle = SubscriptionHandle {
                    state: Arc::new(Mutex::new(Subscription::failed(address, &e))),
                    cancel,
                    task: None,
                };
                (handle, false)
            }
        };

        self.registry.lock().await.insert(address, handle);
        subscribed
    }

    /// Stop watching `address`
    ///
    /// Waits for the ingestion loop to exit, so no event for this address is
    /// appended after this returns.
    ///
    /// # Returns
    /// `true` if an active subscription was stopped
    pub async fn unsubscribe(&self, address: Address) -> bool {
        let _guard = self.lifecycle_guard(address).await;

        let (task, state) = {
            let mut registry = self.registry.lock().await;
            let Some(handle) = registry.get_mut(&address) else {
                return false;
            };
            let Some(task) = handle.task.take() else {
                return false;
            };
            if handle.cancel.send(true).is_err() {
                debug!(%address, "Ingestion loop already exited");
            }
            (task, Arc::clone(&handle.state))
        };

        if let Err(e) = task.await {
            error!(%address, error = %e, "Ingestion task ended abnormally");
            let mut state = lock(&state);
            state.status = SubscriptionStatus::Failed(e.to_string());
            state.last_error = Some(e.to_string());
        }

        let stopped = lock(&state).status == SubscriptionStatus::Stopped;
        if stopped {
            info!(%address, "Unsubscribed");
        }
        stopped
    }

    /// Current state of the subscription for `address`, if one was ever requested
    ///
    /// While a first subscribe is still connecting this is `None`.
    pub async fn subscription(&self, address: Address) -> Option<Subscription> {
        self.registry
            .lock()
            .await
            .get(&address)
            .map(SubscriptionHandle::snapshot)
    }

    /// All known subscriptions, in no particular order
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.registry
            .lock()
            .await
            .values()
            .map(SubscriptionHandle::snapshot)
            .collect()
    }

    /// Stop every running subscription
    pub async fn shutdown(&self) {
        let addresses: Vec<Address> = self.registry.lock().await.keys().copied().collect();
        for address in addresses {
            self.unsubscribe(address).await;
        }
    }
}

/// Why an ingestion loop ended
enum LoopExit {
    Cancelled,
    Failed(String),
}

/// Ingestion loop for one subscription
///
/// Cancellation is checked first on every iteration and again after decoding,
/// so once it is signalled no further event is appended.
async fn ingest(
    address: Address,
    mut stream: LogStream,
    mut cancelled: watch::Receiver<bool>,
    store: Arc<TransactionStore>,
    state: SharedState,
) {
    info!(%address, "Ingestion loop started");

    let exit = loop {
        tokio::select! {
            biased;
            // Err means the manager itself is gone, treated the same way
            _ = cancelled.changed() => break LoopExit::Cancelled,
            event = stream.events.recv() => match event {
                Some(raw) => {
                    let outcome = decode_transfer(&raw);
                    if *cancelled.borrow() {
                        break LoopExit::Cancelled;
                    }
                    record(address, &store, &state, &raw, outcome);
                }
                None => {
                    let reason = stream
                        .errors
                        .try_recv()
                        .unwrap_or(SourceError::StreamClosed);
                    break LoopExit::Failed(reason.to_string());
                }
            },
            Some(e) = stream.errors.recv() => break LoopExit::Failed(e.to_string()),
        }
    };

    let mut state = lock(&state);
    match exit {
        LoopExit::Cancelled => {
            state.status = SubscriptionStatus::Stopped;
            info!(%address, stored = state.transfers_stored, "Ingestion loop stopped");
        }
        LoopExit::Failed(reason) => {
            error!(%address, error = %reason, "Log stream failed, ingestion stopped");
            state.last_error = Some(reason.clone());
            state.status = SubscriptionStatus::Failed(reason);
        }
    }
}

fn record(
    address: Address,
    store: &TransactionStore,
    state: &SharedState,
    raw: &RawLogEvent,
    outcome: Result<Option<Transaction>, DecodeError>,
) {
    match outcome {
        Ok(Some(tx)) => {
            store.append(tx);
            let mut state = lock(state);
            state.events_received += 1;
            state.transfers_stored += 1;
        }
        Ok(None) => {
            debug!(
                %address,
                block = raw.block_number,
                topic = ?raw.topics.first(),
                "Discarding non-Transfer log"
            );
            lock(state).events_received += 1;
        }
        Err(e) => {
            warn!(
                %address,
                block = raw.block_number,
                data = %raw.data_hex(),
                error = %e,
                "Dropping malformed Transfer log"
            );
            let mut state = lock(state);
            state.events_received += 1;
            state.decode_failures += 1;
            state.last_error = Some(e.to_string());
        }
    }
}
