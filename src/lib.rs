//! Transfer Parser Library
//!
//! This crate subscribes to event logs of watched addresses on an Ethereum
//! node, decodes ERC-20 `Transfer` events into transactions and answers
//! current-block and per-address history queries while ingestion runs.

pub mod decoder;
pub mod filter;
pub mod logging;
pub mod parser;
pub mod server;
pub mod source;
pub mod store;
pub mod subscription;

// Re-export commonly used types
pub use decoder::{decode_transfer, DecodeError, RawLogEvent, Transaction};
pub use filter::{parse_address, TRANSFER_TOPIC};
pub use parser::{Parser, NO_BLOCK};
pub use source::{LogSource, LogStream, NodeLogSource, SourceConfig, SourceError};
pub use store::{Snapshot, TransactionStore};
pub use subscription::{Subscription, SubscriptionManager, SubscriptionStatus};
