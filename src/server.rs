//! HTTP Facade
//!
//! Exposes the [`Parser`] over JSON/HTTP. Handlers only parse paths, call the
//! parser and format the result; a bad address yields a structured error,
//! never a crash.

use std::future::Future;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::debug;

use crate::decoder::Transaction;
use crate::filter::{parse_address, AddressError};
use crate::parser::Parser;
use crate::subscription::{Subscription, SubscriptionStatus};

/// Default listen host
pub const DEFAULT_HOST: &str = "localhost";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8888;

/// Machine-readable error codes carried in [`ErrorBody`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidAddress = 1001,
    SubscriptionNotFound = 2000,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::InvalidAddress(_) => ErrorCode::InvalidAddress,
            ApiError::SubscriptionNotFound(_) => ErrorCode::SubscriptionNotFound,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            ApiError::SubscriptionNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// JSON body of every error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code().code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Response of `GET /block`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockResponse {
    /// Current block, -1 before the first transfer
    pub id: i64,
}

/// Transfer as served over HTTP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMessage {
    /// Sender address with 0x prefix
    pub from: String,
    /// Recipient address with 0x prefix
    pub to: String,
    /// Token amount as decimal string
    pub value: String,
    pub block_number: u64,
}

impl From<&Transaction> for TransactionMessage {
    fn from(tx: &Transaction) -> Self {
        Self {
            from: format_address(tx.from),
            to: format_address(tx.to),
            value: format_value(tx.value),
            block_number: tx.block_number,
        }
    }
}

/// Subscription state as served over HTTP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMessage {
    pub address: String,
    /// "active", "stopped" or "failed"
    pub status: String,
    /// Failure reason when `status` is "failed"
    pub reason: Option<String>,
    pub last_error: Option<String>,
    pub events_received: u64,
    pub transfers_stored: u64,
    pub decode_failures: u64,
}

impl From<&Subscription> for SubscriptionMessage {
    fn from(sub: &Subscription) -> Self {
        let reason = match &sub.status {
            SubscriptionStatus::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        Self {
            address: format_address(sub.address),
            status: sub.status.name().to_string(),
            reason,
            last_error: sub.last_error.clone(),
            events_received: sub.events_received,
            transfers_stored: sub.transfers_stored,
            decode_failures: sub.decode_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeResponse {
    pub subscribed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsubscribeResponse {
    pub unsubscribed: bool,
}

/// Format an address as lower-case hex string with 0x prefix
pub fn format_address(address: Address) -> String {
    format!("{:#x}", address)
}

/// Format a U256 value as decimal string
pub fn format_value(value: U256) -> String {
    value.to_string()
}

/// Build the router over a shared parser
pub fn router(parser: Arc<Parser>) -> Router {
    Router::new()
        .route("/block", get(get_block))
        .route("/transactions/:address", get(get_transactions))
        .route(
            "/subscriptions/:address",
            get(get_subscription).post(subscribe).delete(unsubscribe),
        )
        .with_state(parser)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, parser: Arc<Parser>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(parser))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn get_block(State(parser): State<Arc<Parser>>) -> Json<BlockResponse> {
    Json(BlockResponse {
        id: parser.get_current_block(),
    })
}

async fn get_transactions(
    State(parser): State<Arc<Parser>>,
    Path(address): Path<String>,
) -> Result<Json<Vec<TransactionMessage>>, ApiError> {
    let address = parse_address(&address)?;
    let transactions = parser.get_transactions(&address);
    debug!(%address, count = transactions.len(), "Serving transactions");
    Ok(Json(transactions.iter().map(TransactionMessage::from).collect()))
}

async fn get_subscription(
    State(parser): State<Arc<Parser>>,
    Path(address): Path<String>,
) -> Result<Json<SubscriptionMessage>, ApiError> {
    let address = parse_address(&address)?;
    parser
        .subscription(address)
        .await
        .map(|sub| Json(SubscriptionMessage::from(&sub)))
        .ok_or_else(|| ApiError::SubscriptionNotFound(format_address(address)))
}

async fn subscribe(
    State(parser): State<Arc<Parser>>,
    Path(address): Path<String>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let address = parse_address(&address)?;
    Ok(Json(SubscribeResponse {
        subscribed: parser.subscribe(address).await,
    }))
}

async fn unsubscribe(
    State(parser): State<Arc<Parser>>,
    Path(address): Path<String>,
) -> Result<Json<UnsubscribeResponse>, ApiError> {
    let address = parse_address(&address)?;
    Ok(Json(UnsubscribeResponse {
        unsubscribed: parser.unsubscribe(address).await,
    }))
}
