//! Position-management loop.
//!
//! One pass per scheduler tick: every active subscription is walked
//! sequentially, its decision plan executed in order, and balances
//! re-snapshotted after each executed mutating action so later decisions see
//! fresh state. Failures are isolated per subscriber; three consecutive
//! failing passes for the same account escalate the persisted status to
//! `error` until someone reactivates it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::clients::PositionReader;
use crate::db::Database;
use crate::decisions::DecisionEngine;
use crate::executor::ActionExecutor;
use crate::fees::FeeAccumulator;
use crate::market::MarketDataClient;
use crate::settlement::SettlementEngine;
use crate::types::{AgentConfig, DecisionContext, MarketData, Subscription, SubscriptionStatus};

/// Consecutive failing passes before a subscription is parked in `error`.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Seam over the market data client so passes can be driven in tests.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn get(&self) -> Result<MarketData>;
}

#[async_trait]
impl MarketSource for MarketDataClient {
    async fn get(&self) -> Result<MarketData> {
        MarketDataClient::get(self).await
    }
}

pub struct PositionRunner {
    db: Arc<Database>,
    market: Arc<dyn MarketSource>,
    positions: Arc<dyn PositionReader>,
    engine: DecisionEngine,
    executor: ActionExecutor,
    fees: Arc<FeeAccumulator>,
    settlement: Arc<SettlementEngine>,
    default_fee_bps: u32,
    /// Per-account consecutive-failure counters. Process memory only.
    streaks: Mutex<HashMap<String, u32>>,
}

impl PositionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        market: Arc<dyn MarketSource>,
        positions: Arc<dyn PositionReader>,
        engine: DecisionEngine,
        executor: ActionExecutor,
        fees: Arc<FeeAccumulator>,
        settlement: Arc<SettlementEngine>,
        default_fee_bps: u32,
    ) -> Self {
        Self {
            db,
            market,
            positions,
            engine,
            executor,
            fees,
            settlement,
            default_fee_bps,
            streaks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run_pass(&self) -> Result<()> {
        let subscriptions = self.db.list_active().context("loading subscriptions")?;
        if subscriptions.is_empty() {
            tracing::debug!("[runner] no active subscriptions");
        } else {
            // One market fetch shared by every subscriber this pass.
            let market = self.market.get().await.context("market data unavailable")?;
            tracing::info!(
                "[runner] processing {} active subscriptions",
                subscriptions.len()
            );
            for subscription in &subscriptions {
                self.process_with_isolation(subscription, &market).await;
            }
        }

        if self.fees.should_settle() {
            tracing::info!("[runner] fee threshold reached, settling inline");
            if let Err(err) = self.settlement.run_settlement().await {
                tracing::error!("[runner] inline settlement failed: {err:#}");
            }
        }
        Ok(())
    }

    async fn process_with_isolation(&self, subscription: &Subscription, market: &MarketData) {
        let key = subscription.account_key();
        match self.process_subscription(subscription, market).await {
            Ok(()) => {
                self.streaks.lock().remove(&key);
            }
            Err(err) => {
                tracing::warn!("[runner] pass failed for {key}: {err:#}");
                let streak = {
                    let mut streaks = self.streaks.lock();
                    let streak = streaks.entry(key.clone()).or_insert(0);
                    *streak += 1;
                    *streak
                };
                if streak >= MAX_CONSECUTIVE_ERRORS {
                    tracing::error!(
                        "[runner] {key} failed {streak} consecutive passes, parking in error status"
                    );
                    if let Err(err) = self.db.update_status(&key, SubscriptionStatus::Error) {
                        tracing::error!("[runner] failed to park {key}: {err:#}");
                    }
                    self.streaks.lock().remove(&key);
                }
            }
        }
    }

    async fn process_subscription(
        &self,
        subscription: &Subscription,
        market: &MarketData,
    ) -> Result<()> {
        let agent = AgentConfig::for_agent(&subscription.agent_ens, self.default_fee_bps);
        let mut position = self
            .positions
            .snapshot(&subscription.smart_account, subscription.position_token_id)
            .await
            .context("position snapshot failed")?;

        let ctx = DecisionContext {
            subscription: subscription.clone(),
            position: position.clone(),
            market: market.clone(),
        };
        let response = self.engine.agent_decisions(&ctx).await;
        tracing::info!(
            "[runner] {} plan: {} decisions from {:?}",
            subscription.smart_account,
            response.decisions.len(),
            response.source
        );

        for decision in &response.decisions {
            let outcome = self
                .executor
                .execute(subscription, decision, &position, &agent, market)
                .await;
            if let Some(error) = &outcome.error {
                // An individual decision failing is not a loop failure.
                tracing::warn!(
                    "[runner] {} {} failed: {error}",
                    subscription.smart_account,
                    decision.action.kind()
                );
            }
            if outcome.executed && decision.action.is_mutating() {
                position = self
                    .positions
                    .snapshot(&subscription.smart_account, subscription.position_token_id)
                    .await
                    .context("re-snapshot after executed action failed")?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn streak_for(&self, account: &str) -> u32 {
        self.streaks
            .lock()
            .get(&account.to_lowercase())
            .copied()
            .unwrap_or(0)
    }
}
