//! HTTP handlers.
//!
//! Subscription lifecycle, channel bootstrap, fee inspection, and the paid
//! insights endpoint. Every failure is an [`ApiError`] so the wire shape is
//! always `{code, error}`.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::channels::{parse_payment_header, price_for_endpoint, ChannelState};
use crate::clients::PositionReader;
use crate::error::ApiError;
use crate::rules::rule_based_decisions;
use crate::runner::MarketSource;
use crate::types::{
    AgentDecision, DecisionContext, DistributionMode, MarketData, PositionSnapshot, Subscription,
    SubscriptionStatus,
};
use crate::AppState;

const PAYMENT_HEADER: &str = "x-payment";
const INSIGHTS_ENDPOINT: &str = "agent-insights";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub owner: String,
    pub smart_account: String,
    #[serde(default)]
    pub session_key: Option<String>,
    pub agent_ens: String,
    pub mode: DistributionMode,
    #[serde(default)]
    pub compound_percent: f64,
    #[serde(default)]
    pub distribute_percent: f64,
    #[serde(default)]
    pub distribution_destination: Option<String>,
    #[serde(default)]
    pub destination_chain: Option<u64>,
    #[serde(default)]
    pub position_token_id: Option<u64>,
}

impl CreateSubscriptionRequest {
    fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [
            ("owner", &self.owner),
            ("smartAccount", &self.smart_account),
            ("agentEns", &self.agent_ens),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::BadRequest(format!("{field} must not be empty")));
            }
        }
        for (field, value) in [
            ("compoundPercent", self.compound_percent),
            ("distributePercent", self.distribute_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ApiError::BadRequest(format!(
                    "{field} must be between 0 and 100"
                )));
            }
        }
        if self.distribute_percent > 0.0 && self.distribution_destination.is_none() {
            return Err(ApiError::BadRequest(
                "distributionDestination is required when distributePercent is set".to_string(),
            ));
        }
        Ok(())
    }
}

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<Json<Subscription>, ApiError> {
    request.validate()?;
    let subscription = Subscription {
        owner: request.owner,
        smart_account: request.smart_account.to_lowercase(),
        session_key: request.session_key,
        agent_ens: request.agent_ens,
        mode: request.mode,
        compound_percent: request.compound_percent,
        distribute_percent: request.distribute_percent,
        distribution_destination: request.distribution_destination,
        destination_chain: request.destination_chain,
        position_token_id: request.position_token_id,
        status: SubscriptionStatus::Active,
        last_action_at: None,
        total_collected_usd: 0.0,
        total_compounded_usd: 0.0,
        total_distributed_usd: 0.0,
        created_at: Utc::now(),
    };
    state
        .db
        .upsert_subscription(&subscription)
        .map_err(ApiError::internal)?;
    tracing::info!(
        "[http] subscription upserted for {} -> {}",
        subscription.smart_account,
        subscription.agent_ens
    );
    Ok(Json(subscription))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    let subscriptions = state.db.list_subscriptions().map_err(ApiError::internal)?;
    Ok(Json(subscriptions))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    state
        .db
        .get_subscription(&account)
        .map_err(ApiError::internal)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no subscription for {account}")))
}

async fn set_status(
    state: &AppState,
    account: &str,
    status: SubscriptionStatus,
) -> Result<Json<Subscription>, ApiError> {
    state
        .db
        .update_status(account, status)
        .map_err(|_| ApiError::NotFound(format!("no subscription for {account}")))?;
    state
        .db
        .get_subscription(account)
        .map_err(ApiError::internal)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no subscription for {account}")))
}

pub async fn pause_subscription(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    set_status(&state, &account, SubscriptionStatus::Paused).await
}

pub async fn resume_subscription(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    set_status(&state, &account, SubscriptionStatus::Active).await
}

/// Clears the delegated key material; the row itself stays for history.
pub async fn revoke_subscription(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    state
        .db
        .revoke_subscription(&account)
        .map_err(|_| ApiError::NotFound(format!("no subscription for {account}")))?;
    state
        .db
        .get_subscription(&account)
        .map_err(ApiError::internal)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no subscription for {account}")))
}

/// Brings a parked subscription back into the loop.
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    set_status(&state, &account, SubscriptionStatus::Active).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub caller: String,
    pub channel_id: String,
}

pub async fn create_channel(
    State(state): State<AppState>,
    Json(request): Json<CreateChannelRequest>,
) -> Result<Json<ChannelState>, ApiError> {
    if request.caller.trim().is_empty() || request.channel_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "caller and channelId must not be empty".to_string(),
        ));
    }
    let channel = state
        .ledger
        .create_channel(&request.caller, &request.channel_id);
    Ok(Json(channel))
}

pub async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelState>> {
    Json(state.ledger.all_channels())
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path((caller, channel_id)): Path<(String, String)>,
) -> Result<Json<ChannelState>, ApiError> {
    state
        .ledger
        .channel_state(&caller, &channel_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no channel {channel_id} for {caller}")))
}

pub async fn fee_summary(State(state): State<AppState>) -> Json<serde_json::Value> {
    let rows = state.fees.fee_summary();
    let grand_total_usd: f64 = rows.iter().map(|row| row.total_usd).sum();
    Json(serde_json::json!({
        "agents": rows,
        "grandTotalUsd": grand_total_usd,
    }))
}

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    pub account: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsResponse {
    pub account: String,
    pub position: PositionSnapshot,
    pub market: MarketData,
    pub decisions: Vec<AgentDecision>,
    pub channel: ChannelState,
}

/// Paid endpoint. Requires a valid `x-payment` proof before any work runs;
/// a rejected proof never reaches the position reader.
pub async fn agent_insights(
    State(state): State<AppState>,
    Query(query): Query<InsightsQuery>,
    headers: HeaderMap,
) -> Result<Json<InsightsResponse>, ApiError> {
    let header = headers
        .get(PAYMENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::PaymentRequired("missing x-payment header".to_string()))?;
    let proof = parse_payment_header(header)
        .ok_or_else(|| ApiError::PaymentRequired("malformed payment header".to_string()))?;
    let price = price_for_endpoint(INSIGHTS_ENDPOINT)
        .ok_or_else(|| ApiError::internal("insights endpoint is not priced"))?;
    let channel = state
        .ledger
        .verify_payment(&proof, price)
        .map_err(|err| ApiError::PaymentRequired(err.to_string()))?;

    let account = query
        .account
        .ok_or_else(|| ApiError::BadRequest("account query parameter is required".to_string()))?;
    let subscription = state
        .db
        .get_subscription(&account)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound(format!("no subscription for {account}")))?;

    let position = state
        .positions
        .snapshot(&subscription.smart_account, subscription.position_token_id)
        .await
        .map_err(ApiError::internal)?;
    let market = state.market.get().await.map_err(ApiError::internal)?;

    let ctx = DecisionContext {
        subscription: subscription.clone(),
        position: position.clone(),
        market: market.clone(),
    };
    let decisions = rule_based_decisions(&ctx);

    Ok(Json(InsightsResponse {
        account: subscription.account_key(),
        position,
        market,
        decisions,
        channel,
    }))
}
