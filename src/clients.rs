//! Boundary traits for the external collaborators, plus the shipped HTTP
//! adapters. The position reader and the delegated execution relay live in
//! other services; only their contracts are consumed here.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{PositionSnapshot, Subscription};

const READ_TIMEOUT: Duration = Duration::from_secs(10);
// Delegated submissions can take a while to confirm.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);

/// One low-level call ready for delegated submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: String,
    pub data: String,
    pub value: u64,
}

/// Which pool leg a transfer moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLeg {
    Token0,
    Token1,
}

/// Protocol-level intent, translated into calls by the calldata builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallIntent {
    Collect {
        position_token_id: u64,
        recipient: String,
    },
    AddLiquidity {
        position_token_id: Option<u64>,
        amount0: u128,
        amount1: u128,
    },
    Transfer {
        token: TokenLeg,
        to: String,
        amount: u128,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitResult {
    pub success: bool,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait PositionReader: Send + Sync {
    /// Snapshot a subscriber's holdings. Must be cheap to call repeatedly
    /// and must return an empty snapshot, not an error, for a zero-balance
    /// account.
    async fn snapshot(
        &self,
        account: &str,
        position_token_id: Option<u64>,
    ) -> Result<PositionSnapshot>;
}

#[async_trait]
pub trait DelegatedSubmitter: Send + Sync {
    /// Submit a batch of calls through the subscriber's delegated signing
    /// key. Called at most once per decision; no retry on failure.
    async fn submit(&self, subscription: &Subscription, calls: &[Call]) -> Result<SubmitResult>;
}

/// Pure translation of intents into calls. No I/O.
pub trait CalldataBuilder: Send + Sync {
    fn build(&self, intent: &CallIntent) -> Vec<Call>;
}

pub struct HttpPositionReader {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPositionReader {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(READ_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PositionReader for HttpPositionReader {
    async fn snapshot(
        &self,
        account: &str,
        position_token_id: Option<u64>,
    ) -> Result<PositionSnapshot> {
        let mut request = self
            .http
            .get(format!("{}/positions/{}", self.base_url, account));
        if let Some(token_id) = position_token_id {
            request = request.query(&[("position", token_id)]);
        }
        let response = request.send().await.context("position read failed")?;
        let response = response
            .error_for_status()
            .context("position read rejected")?;
        response
            .json::<PositionSnapshot>()
            .await
            .context("position snapshot was not valid JSON")
    }
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    account: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_key: Option<&'a str>,
    calls: &'a [Call],
}

pub struct HttpDelegatedSubmitter {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDelegatedSubmitter {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(SUBMIT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DelegatedSubmitter for HttpDelegatedSubmitter {
    async fn submit(&self, subscription: &Subscription, calls: &[Call]) -> Result<SubmitResult> {
        let request = ExecuteRequest {
            account: &subscription.smart_account,
            session_key: subscription.session_key.as_deref(),
            calls,
        };
        let response = self
            .http
            .post(format!("{}/execute", self.base_url))
            .json(&request)
            .send()
            .await
            .context("delegated submission failed")?;
        let response = response
            .error_for_status()
            .context("delegated submission rejected")?;
        response
            .json::<SubmitResult>()
            .await
            .context("submission result was not valid JSON")
    }
}

/// Calldata builder targeting a Uniswap-v3-style position manager.
pub struct StaticCalldataBuilder {
    position_manager: String,
    token0: String,
    token1: String,
}

// Function selectors on the position manager and ERC-20 legs.
const SELECTOR_COLLECT: &str = "0xfc6f7865";
const SELECTOR_INCREASE_LIQUIDITY: &str = "0x219f5d17";
const SELECTOR_TRANSFER: &str = "0xa9059cbb";

impl StaticCalldataBuilder {
    pub fn new(position_manager: &str, token0: &str, token1: &str) -> Self {
        Self {
            position_manager: position_manager.to_string(),
            token0: token0.to_string(),
            token1: token1.to_string(),
        }
    }

    fn token_address(&self, token: TokenLeg) -> &str {
        match token {
            TokenLeg::Token0 => &self.token0,
            TokenLeg::Token1 => &self.token1,
        }
    }
}

fn encode_address(address: &str) -> String {
    format!("{:0>64}", address.trim_start_matches("0x").to_lowercase())
}

fn encode_u128(value: u128) -> String {
    format!("{value:064x}")
}

fn encode_u64(value: u64) -> String {
    format!("{value:064x}")
}

impl CalldataBuilder for StaticCalldataBuilder {
    fn build(&self, intent: &CallIntent) -> Vec<Call> {
        match intent {
            CallIntent::Collect {
                position_token_id,
                recipient,
            } => vec![Call {
                to: self.position_manager.clone(),
                data: format!(
                    "{}{}{}{}{}",
                    SELECTOR_COLLECT,
                    encode_u64(*position_token_id),
                    encode_address(recipient),
                    encode_u128(u128::MAX),
                    encode_u128(u128::MAX),
                ),
                value: 0,
            }],
            CallIntent::AddLiquidity {
                position_token_id,
                amount0,
                amount1,
            } => vec![Call {
                to: self.position_manager.clone(),
                data: format!(
                    "{}{}{}{}",
                    SELECTOR_INCREASE_LIQUIDITY,
                    encode_u64(position_token_id.unwrap_or(0)),
                    encode_u128(*amount0),
                    encode_u128(*amount1),
                ),
                value: 0,
            }],
            CallIntent::Transfer { token, to, amount } => vec![Call {
                to: self.token_address(*token).to_string(),
                data: format!(
                    "{}{}{}",
                    SELECTOR_TRANSFER,
                    encode_address(to),
                    encode_u128(*amount),
                ),
                value: 0,
            }],
        }
    }
}
