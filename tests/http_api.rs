//! HTTP facade tests against the router, no socket involved.

use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde::de::DeserializeOwned;
use tower::ServiceExt; // trait for .oneshot

use transfer_parser::server::{
    router, BlockResponse, ErrorBody, SubscribeResponse, SubscriptionMessage, TransactionMessage,
    UnsubscribeResponse,
};
use transfer_parser::source::{LogSource, LogStream, LogStreamSender, SourceError};
use transfer_parser::{Parser, Transaction};

/// Accepts every filter and never produces an event
#[derive(Default)]
struct IdleSource {
    senders: Mutex<Vec<LogStreamSender>>,
}

#[async_trait]
impl LogSource for IdleSource {
    async fn open_filtered_stream(&self, _addresses: &[Address]) -> Result<LogStream, SourceError> {
        let (sender, stream) = LogStream::channel(1);
        self.senders.lock().unwrap().push(sender);
        Ok(stream)
    }
}

struct DownSource;

#[async_trait]
impl LogSource for DownSource {
    async fn open_filtered_stream(&self, _addresses: &[Address]) -> Result<LogStream, SourceError> {
        Err(SourceError::Timeout(5000))
    }
}

fn app(source: impl LogSource + 'static) -> (Router, Arc<Parser>) {
    let parser = Arc::new(Parser::new(Arc::new(source)));
    (router(Arc::clone(&parser)), parser)
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Bytes) {
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = res.status();
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, body)
}

async fn call_json<T: DeserializeOwned>(app: &Router, method: &str, uri: &str) -> (StatusCode, T) {
    let (status, body) = call(app, method, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

const ALICE: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const BOB: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

// ==================== Block Tests ====================

#[tokio::test]
async fn test_get_block_before_any_transfer() {
    let (app, _parser) = app(IdleSource::default());
    let (status, body) = call_json::<BlockResponse>(&app, "GET", "/block").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.id, -1);
}

#[tokio::test]
async fn test_get_block_after_transfers() {
    let (app, parser) = app(IdleSource::default());
    for block_number in [10, 12, 11] {
        parser.store().append(Transaction {
            from: ALICE.parse().unwrap(),
            to: BOB.parse().unwrap(),
            value: U256::from(1u64),
            block_number,
        });
    }

    let (_, body) = call_json::<BlockResponse>(&app, "GET", "/block").await;
    assert_eq!(body, BlockResponse { id: 12 });
}

// ==================== Transaction Tests ====================

#[tokio::test]
async fn test_get_transactions_json() {
    let (app, parser) = app(IdleSource::default());
    parser.store().append(Transaction {
        from: ALICE.parse().unwrap(),
        to: BOB.parse().unwrap(),
        value: U256::from(10u64).pow(U256::from(18)),
        block_number: 7,
    });

    let (status, body) = call_json::<Vec<TransactionMessage>>(&app, "GET", &format!("/transactions/{BOB}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        vec![TransactionMessage {
            from: ALICE.into(),
            to: BOB.into(),
            value: "1000000000000000000".into(),
            block_number: 7,
        }]
    );
}

#[tokio::test]
async fn test_get_transactions_accepts_checksum_case() {
    let (app, _parser) = app(IdleSource::default());
    let (status, body) = call_json::<Vec<TransactionMessage>>(
        &app,
        "GET",
        "/transactions/0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_get_transactions_invalid_address() {
    let (app, _parser) = app(IdleSource::default());
    let (status, body) = call_json::<ErrorBody>(&app, "GET", "/transactions/0x1234").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.code, 1001);
    assert!(body.message.starts_with("invalid address"));
}

// ==================== Subscription Tests ====================

#[tokio::test]
async fn test_subscribe_lifecycle() {
    let (app, _parser) = app(IdleSource::default());
    let uri = format!("/subscriptions/{ALICE}");

    let (status, body) = call_json::<SubscribeResponse>(&app, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.subscribed);

    let (_, sub) = call_json::<SubscriptionMessage>(&app, "GET", &uri).await;
    assert_eq!(sub.status, "active");
    assert_eq!(sub.address, ALICE);

    let (_, body) = call_json::<UnsubscribeResponse>(&app, "DELETE", &uri).await;
    assert!(body.unsubscribed);

    let (_, sub) = call_json::<SubscriptionMessage>(&app, "GET", &uri).await;
    assert_eq!(sub.status, "stopped");
}

#[tokio::test]
async fn test_subscribe_unreachable_node() {
    let (app, _parser) = app(DownSource);
    let uri = format!("/subscriptions/{ALICE}");

    let (status, body) = call_json::<SubscribeResponse>(&app, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.subscribed);

    let (_, sub) = call_json::<SubscriptionMessage>(&app, "GET", &uri).await;
    assert_eq!(sub.status, "failed");
    assert_eq!(sub.reason.as_deref(), Some("Connection timeout after 5000ms"));
}

#[tokio::test]
async fn test_unknown_subscription_not_found() {
    let (app, _parser) = app(IdleSource::default());
    let (status, body) = call_json::<ErrorBody>(&app, "GET", &format!("/subscriptions/{BOB}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.code, 2000);
}

#[tokio::test]
async fn test_unsubscribe_unknown_address() {
    let (app, _parser) = app(IdleSource::default());
    let (status, body) = call_json::<UnsubscribeResponse>(&app, "DELETE", &format!("/subscriptions/{BOB}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.unsubscribed);
}

#[tokio::test]
async fn test_subscribe_invalid_address() {
    let (app, _parser) = app(IdleSource::default());
    let (status, _) = call(&app, "POST", "/subscriptions/not-an-address").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
