use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use lp_autopilot::channels::ChannelLedger;
use lp_autopilot::clients::{HttpDelegatedSubmitter, HttpPositionReader, StaticCalldataBuilder};
use lp_autopilot::config::Config;
use lp_autopilot::db::Database;
use lp_autopilot::decisions::DecisionEngine;
use lp_autopilot::executor::ActionExecutor;
use lp_autopilot::fees::FeeAccumulator;
use lp_autopilot::market::MarketDataClient;
use lp_autopilot::reasoning::OpenRouterClient;
use lp_autopilot::runner::PositionRunner;
use lp_autopilot::scheduler::Scheduler;
use lp_autopilot::settlement::{LogSettlementSink, SettlementEngine};
use lp_autopilot::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("starting lp-autopilot on {}", config.bind_addr);

    let db = Arc::new(Database::open(&config.db_path)?);
    let ledger = Arc::new(ChannelLedger::new());
    let fees = Arc::new(FeeAccumulator::new());
    let settlement = Arc::new(SettlementEngine::new(
        fees.clone(),
        Arc::new(LogSettlementSink),
    ));

    let market = Arc::new(MarketDataClient::new(&config.indexer_base_url));
    let positions = Arc::new(HttpPositionReader::new(&config.indexer_base_url));
    let submitter = Arc::new(HttpDelegatedSubmitter::new(&config.relay_base_url));
    let calldata = Arc::new(StaticCalldataBuilder::new(
        &config.position_manager_address,
        &config.token0_address,
        &config.token1_address,
    ));
    let reasoning = Arc::new(OpenRouterClient::new(
        &config.openrouter_base_url,
        config.openrouter_api_key.clone(),
        &config.openrouter_model,
    ));
    if config.openrouter_api_key.is_none() {
        tracing::warn!("no reasoning credentials configured, rule fallback only");
    }

    let executor = ActionExecutor::new(
        positions.clone(),
        submitter,
        calldata,
        fees.clone(),
        db.clone(),
    );
    let runner = Arc::new(PositionRunner::new(
        db.clone(),
        market.clone(),
        positions.clone(),
        DecisionEngine::new(reasoning),
        executor,
        fees.clone(),
        settlement.clone(),
        config.fee_bps,
    ));

    let scheduler = Scheduler::new(
        runner,
        settlement,
        Duration::from_secs(config.position_interval_secs),
        Duration::from_secs(config.settlement_interval_secs),
    );
    let _handles = scheduler.start();

    let state = AppState {
        db,
        ledger,
        fees,
        market,
        positions,
    };
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    axum::serve(listener, app_router(state))
        .await
        .context("http server failed")?;
    Ok(())
}
