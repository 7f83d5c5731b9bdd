//! Log Source
//!
//! Opens filtered log streams from an Ethereum node. [`LogSource`] is the seam
//! the subscription manager consumes; [`NodeLogSource`] implements it over a
//! WebSocket or IPC pub/sub connection.

use std::path::Path;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::{PubSubFrontend, Subscription};
use alloy::rpc::types::Log;
use alloy::transports::ipc::IpcConnect;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::decoder::RawLogEvent;
use crate::filter::log_filter;

/// Node endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8546";

/// Connection + subscription timeout in milliseconds
pub const CONNECTION_TIMEOUT_MS: u64 = 5000;

/// Buffered events per stream before the forwarder waits on the consumer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Errors raised while opening or maintaining a log stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("IPC socket not found at path: {0}")]
    SocketNotFound(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    #[error("Log stream closed by the node")]
    StreamClosed,
}

/// Transport to reach the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `ws://` or `wss://` URL
    Ws(String),
    /// Filesystem path of an IPC socket, `~` already expanded
    Ipc(String),
}

impl Endpoint {
    /// Classify an endpoint string
    ///
    /// HTTP URLs are rejected since plain HTTP cannot push log subscriptions.
    pub fn parse(endpoint: &str) -> Result<Self, SourceError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(SourceError::InvalidEndpoint("Endpoint cannot be empty".to_string()));
        }
        if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
            return Ok(Endpoint::Ws(endpoint.to_string()));
        }
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Err(SourceError::InvalidEndpoint(format!(
                "{endpoint} does not support subscriptions, use ws:// or an IPC path"
            )));
        }
        Ok(Endpoint::Ipc(expand_path(endpoint)))
    }
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// Check if an IPC socket exists at the given path
pub fn socket_exists(path: &str) -> bool {
    Path::new(&expand_path(path)).exists()
}

/// Configuration for [`NodeLogSource`]
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// WebSocket URL or IPC socket path
    pub endpoint: String,
    /// Upper bound on connect + subscribe, in milliseconds
    pub timeout_ms: u64,
    /// Capacity of the event channel handed to the consumer
    pub channel_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_ms: CONNECTION_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl SourceConfig {
    /// Create a new config with the specified endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Receiving half of a filtered log stream
///
/// Dropping it releases the upstream subscription.
#[derive(Debug)]
pub struct LogStream {
    /// Raw logs in node delivery order
    pub events: mpsc::Receiver<RawLogEvent>,
    /// Out-of-band failures of the stream
    pub errors: mpsc::Receiver<SourceError>,
}

/// Producing half of a [`LogStream`]
#[derive(Debug, Clone)]
pub struct LogStreamSender {
    events: mpsc::Sender<RawLogEvent>,
    errors: mpsc::Sender<SourceError>,
}

impl LogStream {
    /// Create a connected sender/stream pair
    pub fn channel(capacity: usize) -> (LogStreamSender, LogStream) {
        let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(1);
        (
            LogStreamSender {
                events: events_tx,
                errors: errors_tx,
            },
            LogStream {
                events: events_rx,
                errors: errors_rx,
            },
        )
    }
}

impl LogStreamSender {
    /// Deliver an event, `false` once the consumer has gone away
    pub async fn send_event(&self, event: RawLogEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Signal a stream failure, `false` once the consumer has gone away
    pub async fn send_error(&self, error: SourceError) -> bool {
        self.errors.send(error).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Resolves when the consumer drops its [`LogStream`]
    pub async fn closed(&self) {
        self.events.closed().await
    }
}

/// External source of raw logs matching an address filter
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Install a filter for `addresses` and start streaming matching logs
    ///
    /// Must return within a bounded time; a source that cannot be reached
    /// reports an error instead of hanging.
    async fn open_filtered_stream(&self, addresses: &[Address]) -> Result<LogStream, SourceError>;
}

/// [`LogSource`] backed by `eth_subscribe("logs")` on a node
pub struct NodeLogSource {
    config: SourceConfig,
}

impl NodeLogSource {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    /// Create with a specific endpoint and default settings
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self::new(SourceConfig::with_endpoint(endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Connect a pub/sub provider to the configured endpoint
    pub async fn connect(&self) -> Result<RootProvider<PubSubFrontend>, SourceError> {
        match Endpoint::parse(&self.config.endpoint)? {
            Endpoint::Ws(url) => {
                info!("Connecting to WebSocket endpoint {}", url);
                ProviderBuilder::new()
                    .on_ws(WsConnect::new(url))
                    .await
                    .map_err(|e| SourceError::ConnectionFailed(e.to_string()))
            }
            Endpoint::Ipc(path) => {
                if !Path::new(&path).exists() {
                    return Err(SourceError::SocketNotFound(path));
                }
                info!("Connecting to IPC socket at {}", path);
                let ipc: IpcConnect<String> = IpcConnect::new(path);
                ProviderBuilder::new()
                    .on_ipc(ipc)
                    .await
                    .map_err(|e| SourceError::ConnectionFailed(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl LogSource for NodeLogSource {
    async fn open_filtered_stream(&self, addresses: &[Address]) -> Result<LogStream, SourceError> {
        let filter = log_filter(addresses);
        let timeout_ms = self.config.timeout_ms;

        let (provider, subscription) = timeout(self.config.connect_timeout(), async {
            let provider = self.connect().await?;
            let subscription = provider
                .subscribe_logs(&filter)
                .await
                .map_err(|e| SourceError::SubscriptionFailed(e.to_string()))?;
            Ok::<_, SourceError>((provider, subscription))
        })
        .await
        .map_err(|_| SourceError::Timeout(timeout_ms))??;

        info!(addresses = addresses.len(), "Log subscription installed");

        let (sender, stream) = LogStream::channel(self.config.channel_capacity);
        tokio::spawn(forward_logs(provider, subscription, sender));
        Ok(stream)
    }
}

/// Pump node logs into the stream until either side closes
///
/// Owns the provider: dropping it at the end closes the connection and with
/// it the node-side subscription.
async fn forward_logs(
    provider: RootProvider<PubSubFrontend>,
    mut subscription: Subscription<Log>,
    sender: LogStreamSender,
) {
    loop {
        tokio::select! {
            _ = sender.closed() => {
                debug!("Log stream consumer gone, releasing subscription");
                break;
            }
            received = subscription.recv() => match received {
                Ok(log) => match RawLogEvent::try_from(&log) {
                    Ok(event) => {
                        if !sender.send_event(event).await {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping log that cannot be ingested"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Log subscription lagged, events were dropped");
                }
                Err(RecvError::Closed) => {
                    sender.send_error(SourceError::StreamClosed).await;
                    break;
                }
            },
        }
    }
    drop(provider);
}
