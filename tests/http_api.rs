//! HTTP surface tests driven through the router with `tower::ServiceExt`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use lp_autopilot::channels::{format_payment_header, ChannelLedger, PaymentProof};
use lp_autopilot::clients::PositionReader;
use lp_autopilot::db::Database;
use lp_autopilot::fees::FeeAccumulator;
use lp_autopilot::runner::MarketSource;
use lp_autopilot::types::{MarketData, PositionSnapshot};
use lp_autopilot::{app_router, AppState};

struct StaticMarket;

#[async_trait]
impl MarketSource for StaticMarket {
    async fn get(&self) -> Result<MarketData> {
        Ok(MarketData {
            token0_price_usd: 2000.0,
            token1_price_usd: 1.0,
            spread_pct: 0.1,
            pool_apr: 12.0,
            comparable_aprs: Vec::new(),
            protocol_tvl_usd: 5_000_000.0,
        })
    }
}

struct StaticReader;

#[async_trait]
impl PositionReader for StaticReader {
    async fn snapshot(
        &self,
        _account: &str,
        _position_token_id: Option<u64>,
    ) -> Result<PositionSnapshot> {
        Ok(PositionSnapshot {
            token0_balance: 1_000_000_000_000_000_000,
            token1_balance: 500_000_000,
            stable_balance: 0,
            has_position: true,
            position_count: 1,
            wallet_usd: 2500.0,
            reference_price: 2000.0,
        })
    }
}

fn state() -> AppState {
    AppState {
        db: Arc::new(Database::open_in_memory().unwrap()),
        ledger: Arc::new(ChannelLedger::new()),
        fees: Arc::new(FeeAccumulator::new()),
        market: Arc::new(StaticMarket),
        positions: Arc::new(StaticReader),
    }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn subscription_body(account: &str) -> Value {
    json!({
        "owner": "0xOwner",
        "smartAccount": account,
        "sessionKey": "0xsession",
        "agentEns": "yieldmax.eth",
        "mode": "mixed",
        "compoundPercent": 70.0,
        "distributePercent": 30.0,
        "distributionDestination": "0xdest",
        "positionTokenId": 42
    })
}

#[tokio::test]
async fn create_then_get_subscription_lowercases_the_key() {
    let app = app_router(state());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/subscriptions",
            subscription_body("0xAbCdEf"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(empty_request("GET", "/api/subscriptions/0xABCDEF"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["smart_account"], "0xabcdef");
    assert_eq!(body["agent_ens"], "yieldmax.eth");
    assert_eq!(body["status"], "active");
}

#[tokio::test]
async fn invalid_subscription_is_rejected_with_a_stable_code() {
    let app = app_router(state());
    let mut body = subscription_body("0xabc");
    body["owner"] = json!("   ");

    let response = app
        .oneshot(json_request("POST", "/api/subscriptions", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["code"], "INVALID_REQUEST");
    assert!(body["error"].as_str().unwrap().contains("owner"));
}

#[tokio::test]
async fn distribute_percent_without_destination_is_rejected() {
    let app = app_router(state());
    let mut body = subscription_body("0xabc");
    body["distributionDestination"] = Value::Null;

    let response = app
        .oneshot(json_request("POST", "/api/subscriptions", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_subscription_is_not_found() {
    let app = app_router(state());
    let response = app
        .oneshot(empty_request("GET", "/api/subscriptions/0xmissing"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn lifecycle_transitions_pause_resume_revoke() {
    let app = app_router(state());
    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/subscriptions",
            subscription_body("0xabc"),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/api/subscriptions/0xabc/pause"))
        .await
        .unwrap();
    assert_eq!(read_json(response).await["status"], "paused");

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/api/subscriptions/0xabc/resume"))
        .await
        .unwrap();
    assert_eq!(read_json(response).await["status"], "active");

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/api/subscriptions/0xabc/revoke"))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["status"], "revoked");
    // Revocation clears the delegated key material.
    assert!(body.get("session_key").is_none() || body["session_key"].is_null());

    let response = app
        .oneshot(empty_request("POST", "/api/subscriptions/0xabc/reactivate"))
        .await
        .unwrap();
    assert_eq!(read_json(response).await["status"], "active");
}

#[tokio::test]
async fn channel_bootstrap_seeds_initial_credit() {
    let app = app_router(state());
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/channels",
            json!({"caller": "0xAgent", "channelId": "0xabc"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["caller_balance"], 10_000_000);
    assert_eq!(body["nonce"], 0);

    let response = app
        .oneshot(empty_request("GET", "/api/channels/0xagent/0xabc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn insights_without_payment_header_is_402() {
    let app = app_router(state());
    let response = app
        .oneshot(empty_request("GET", "/api/agent/insights?account=0xabc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = read_json(response).await;
    assert_eq!(body["code"], "PAYMENT_REQUIRED");
}

#[tokio::test]
async fn insights_with_malformed_header_is_402() {
    let app = app_router(state());
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/agent/insights?account=0xabc")
                .header("x-payment", "x402:not:enough")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

fn payment_header(amount: u64, nonce: u64, new_balance: u64) -> String {
    format_payment_header(&PaymentProof {
        channel_id: "0xchannel".to_string(),
        amount,
        nonce,
        new_balance,
        signature: "sig".to_string(),
        caller: "0xagent".to_string(),
    })
}

#[tokio::test]
async fn valid_payment_unlocks_insights_and_replay_is_rejected() {
    let app = app_router(state());
    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/subscriptions",
            subscription_body("0xabc"),
        ))
        .await
        .unwrap();

    let header = payment_header(10_000, 1, 10_000_000 - 10_000);
    let paid = |header: String| {
        Request::builder()
            .method("GET")
            .uri("/api/agent/insights?account=0xabc")
            .header("x-payment", header)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(paid(header.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["account"], "0xabc");
    assert!(!body["decisions"].as_array().unwrap().is_empty());
    assert_eq!(body["channel"]["nonce"], 1);
    assert_eq!(body["channel"]["counterparty_balance"], 10_000);

    // Same nonce again must bounce off the ledger.
    let response = app.oneshot(paid(header)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = read_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("stale nonce"));
}

#[tokio::test]
async fn underpaying_the_insights_price_is_rejected() {
    let app = app_router(state());
    let header = payment_header(5_000, 1, 10_000_000 - 5_000);
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/agent/insights?account=0xabc")
                .header("x-payment", header)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = read_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("below required"));
}

#[tokio::test]
async fn fee_summary_reports_grand_total() {
    let state = state();
    state.fees.track_fee("a.eth", "0x1", 1.5);
    state.fees.track_fee("b.eth", "0x2", 2.5);
    let app = app_router(state);

    let response = app.oneshot(empty_request("GET", "/api/fees")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["agents"].as_array().unwrap().len(), 2);
    assert!((body["grandTotalUsd"].as_f64().unwrap() - 4.0).abs() < 1e-9);
}
