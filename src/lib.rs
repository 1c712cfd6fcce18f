//! Autopilot service for delegated liquidity positions.
//!
//! A subscriber delegates a smart account; the background loop snapshots the
//! account, asks the decision engine for an action plan, executes it through
//! a relay, and charges a management fee on collected yield. Fees settle
//! through micropayment channels, and an HTTP surface exposes the
//! subscription lifecycle plus a channel-paid insights endpoint.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub mod channels;
pub mod clients;
pub mod config;
pub mod db;
pub mod decisions;
pub mod error;
pub mod executor;
pub mod fees;
pub mod market;
pub mod reasoning;
pub mod routes;
pub mod rules;
pub mod runner;
pub mod scheduler;
pub mod settlement;
pub mod types;

use crate::channels::ChannelLedger;
use crate::clients::PositionReader;
use crate::db::Database;
use crate::fees::FeeAccumulator;
use crate::runner::MarketSource;

/// Shared handles for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub ledger: Arc<ChannelLedger>,
    pub fees: Arc<FeeAccumulator>,
    pub market: Arc<dyn MarketSource>,
    pub positions: Arc<dyn PositionReader>,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/subscriptions",
            get(routes::list_subscriptions).post(routes::create_subscription),
        )
        .route("/api/subscriptions/:account", get(routes::get_subscription))
        .route(
            "/api/subscriptions/:account/pause",
            post(routes::pause_subscription),
        )
        .route(
            "/api/subscriptions/:account/resume",
            post(routes::resume_subscription),
        )
        .route(
            "/api/subscriptions/:account/revoke",
            post(routes::revoke_subscription),
        )
        .route(
            "/api/subscriptions/:account/reactivate",
            post(routes::reactivate_subscription),
        )
        .route(
            "/api/channels",
            get(routes::list_channels).post(routes::create_channel),
        )
        .route(
            "/api/channels/:caller/:channel_id",
            get(routes::get_channel),
        )
        .route("/api/fees", get(routes::fee_summary))
        .route("/api/agent/insights", get(routes::agent_insights))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
