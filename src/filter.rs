//! Transfer Log Filtering
//!
//! Matches log topics against the ERC-20 `Transfer` event signature and builds
//! the node-side log filter for a set of watched addresses.

use std::str::FromStr;

use alloy::primitives::{b256, Address, B256};
use alloy::rpc::types::Filter;
use thiserror::Error;

/// Canonical signature of the ERC-20 transfer event
pub const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

/// keccak256 of [`TRANSFER_EVENT_SIGNATURE`], the first topic of every Transfer log
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// Errors produced when parsing a user-supplied address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address cannot be empty")]
    Empty,

    #[error("Invalid address '{0}'")]
    Invalid(String),
}

/// Check if a topic is the Transfer event signature hash
pub fn is_transfer_topic(topic: &B256) -> bool {
    *topic == TRANSFER_TOPIC
}

/// Check if a log's topic list identifies a Transfer event
///
/// # Returns
/// `false` for an empty topic list (anonymous events) or any other signature
pub fn is_transfer_log(topics: &[B256]) -> bool {
    topics.first().is_some_and(is_transfer_topic)
}

/// Parse a hex address (with or without 0x prefix)
pub fn parse_address(input: &str) -> Result<Address, AddressError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }
    Address::from_str(trimmed).map_err(|_| AddressError::Invalid(trimmed.to_string()))
}

/// Build the log filter installed on the node for the given addresses
///
/// Only the emitting address is constrained; non-Transfer events from the
/// same contracts still arrive and are discarded by the decoder.
pub fn log_filter(addresses: &[Address]) -> Filter {
    Filter::new().address(addresses.to_vec())
}
