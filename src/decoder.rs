//! Transfer Event Decoder
//!
//! Turns raw log records into [`Transaction`]s. Decoding is pure: no logging,
//! no shared state, so it is safe to call from any number of ingestion loops.
//!
//! Two ABI layouts of `Transfer(address,address,uint256)` are accepted:
//! - standard ERC-20: `from` and `to` indexed (3 topics), `value` in a 32-byte data word
//! - fully non-indexed: 1 topic, `from`, `to` and `value` packed into 96 bytes of data

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::Log;
use thiserror::Error;

use crate::filter::is_transfer_log;

/// Size of one ABI word
pub const WORD_SIZE: usize = 32;

/// Topic count of a Transfer log with indexed `from` and `to`
pub const INDEXED_TOPIC_COUNT: usize = 3;

/// Topic count of a Transfer log with no indexed parameters
pub const NON_INDEXED_TOPIC_COUNT: usize = 1;

/// Errors that can occur while decoding a Transfer log
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid Transfer data length {actual}, expected {expected}")]
    InvalidDataLength {
        expected: usize,
        actual: usize,
        event: Box<RawLogEvent>,
    },

    #[error("Unexpected Transfer topic count {count}")]
    UnexpectedTopicCount { count: usize, event: Box<RawLogEvent> },

    #[error("Address word {word} has non-zero padding")]
    InvalidAddressWord { word: B256, event: Box<RawLogEvent> },

    #[error("Log has no block number")]
    MissingBlockNumber,
}

impl DecodeError {
    /// The raw event that failed to decode, kept for diagnostics
    pub fn event(&self) -> Option<&RawLogEvent> {
        match self {
            DecodeError::InvalidDataLength { event, .. }
            | DecodeError::UnexpectedTopicCount { event, .. }
            | DecodeError::InvalidAddressWord { event, .. } => Some(&**event),
            DecodeError::MissingBlockNumber => None,
        }
    }
}

/// Raw log record as delivered by the log source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogEvent {
    /// Contract that emitted the log
    pub address: Address,
    /// Event signature hash followed by indexed parameters
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed parameters
    pub data: Bytes,
    /// Block the log was included in
    pub block_number: u64,
}

impl RawLogEvent {
    /// Data as 0x-prefixed hex, for log output
    pub fn data_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.data))
    }
}

impl TryFrom<&Log> for RawLogEvent {
    type Error = DecodeError;

    /// Pending logs carry no block number and cannot be ingested
    fn try_from(log: &Log) -> Result<Self, Self::Error> {
        let block_number = log.block_number.ok_or(DecodeError::MissingBlockNumber)?;
        Ok(Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number,
        })
    }
}

/// A decoded token transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub from: Address,
    pub to: Address,
    /// Amount in the token's smallest unit
    pub value: U256,
    pub block_number: u64,
}

impl Transaction {
    /// Whether `address` is the sender or the recipient
    pub fn involves(&self, address: &Address) -> bool {
        self.from == *address || self.to == *address
    }
}

/// Decode a Transfer event from a raw log
///
/// # Returns
/// * `Ok(Some(tx))` - the log is a well-formed Transfer
/// * `Ok(None)` - the log is some other event and should be discarded
/// * `Err(DecodeError)` - the log claims to be a Transfer but its payload is malformed
pub fn decode_transfer(raw: &RawLogEvent) -> Result<Option<Transaction>, DecodeError> {
    if !is_transfer_log(&raw.topics) {
        return Ok(None);
    }

    let (from, to, value) = match raw.topics.len() {
        INDEXED_TOPIC_COUNT => {
            expect_data_len(raw, WORD_SIZE)?;
            (
                address_from_word(raw.topics[1], raw)?,
                address_from_word(raw.topics[2], raw)?,
                U256::from_be_slice(&raw.data),
            )
        }
        NON_INDEXED_TOPIC_COUNT => {
            expect_data_len(raw, 3 * WORD_SIZE)?;
            (
                address_from_word(data_word(&raw.data, 0), raw)?,
                address_from_word(data_word(&raw.data, 1), raw)?,
                U256::from_be_slice(&raw.data[2 * WORD_SIZE..]),
            )
        }
        count => {
            return Err(DecodeError::UnexpectedTopicCount {
                count,
                event: Box::new(raw.clone()),
            })
        }
    };

    Ok(Some(Transaction {
        from,
        to,
        value,
        block_number: raw.block_number,
    }))
}

fn expect_data_len(raw: &RawLogEvent, expected: usize) -> Result<(), DecodeError> {
    if raw.data.len() != expected {
        return Err(DecodeError::InvalidDataLength {
            expected,
            actual: raw.data.len(),
            event: Box::new(raw.clone()),
        });
    }
    Ok(())
}

/// Caller guarantees `data` holds at least `index + 1` words
fn data_word(data: &[u8], index: usize) -> B256 {
    B256::from_slice(&data[index * WORD_SIZE..(index + 1) * WORD_SIZE])
}

/// ABI addresses are right-aligned in a word with 12 zero bytes of padding
fn address_from_word(word: B256, raw: &RawLogEvent) -> Result<Address, DecodeError> {
    if word[..12].iter().any(|byte| *byte != 0) {
        return Err(DecodeError::InvalidAddressWord {
            word,
            event: Box::new(raw.clone()),
        });
    }
    Ok(Address::from_word(word))
}
