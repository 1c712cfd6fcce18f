//! Executes one decision against a subscriber's position.
//!
//! Builds the protocol calls for the decision, submits them through the
//! delegated signing key, and folds observable effects (balance deltas,
//! fees, running totals) back into the store. Failures are captured in the
//! outcome and surfaced to the position runner without throwing; a decision
//! that fails must not take down the rest of the plan.

use std::sync::Arc;

use crate::clients::{Call, CallIntent, CalldataBuilder, DelegatedSubmitter, PositionReader, TokenLeg};
use crate::db::Database;
use crate::fees::FeeAccumulator;
use crate::types::{
    AgentAction, AgentConfig, AgentDecision, MarketData, PositionSnapshot, Subscription,
};

/// Wallet value below which compounding is not worth the gas.
pub const MIN_COMPOUND_USD: f64 = 1.0;

#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub executed: bool,
    pub collected_usd: Option<f64>,
    pub error: Option<String>,
}

impl ActionOutcome {
    fn skipped() -> Self {
        Self::default()
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            executed: false,
            collected_usd: None,
            error: Some(message.into()),
        }
    }
}

pub struct ActionExecutor {
    positions: Arc<dyn PositionReader>,
    submitter: Arc<dyn DelegatedSubmitter>,
    calldata: Arc<dyn CalldataBuilder>,
    fees: Arc<FeeAccumulator>,
    db: Arc<Database>,
}

impl ActionExecutor {
    pub fn new(
        positions: Arc<dyn PositionReader>,
        submitter: Arc<dyn DelegatedSubmitter>,
        calldata: Arc<dyn CalldataBuilder>,
        fees: Arc<FeeAccumulator>,
        db: Arc<Database>,
    ) -> Self {
        Self {
            positions,
            submitter,
            calldata,
            fees,
            db,
        }
    }

    pub async fn execute(
        &self,
        sub: &Subscription,
        decision: &AgentDecision,
        before: &PositionSnapshot,
        agent: &AgentConfig,
        _market: &MarketData,
    ) -> ActionOutcome {
        match &decision.action {
            AgentAction::Collect => self.collect(sub, before, agent).await,
            AgentAction::Compound { percent } => self.compound(sub, *percent, before).await,
            AgentAction::Distribute {
                percent,
                destination,
            } => {
                self.distribute(sub, *percent, destination.as_deref(), before)
                    .await
            }
            AgentAction::Rebalance {
                current_ratio,
                target_ratio,
            } => {
                // Reserved for a cross-venue swap integration.
                tracing::info!(
                    "[executor] {} would rebalance {:.2} -> {:.2}, not yet supported",
                    sub.smart_account,
                    current_ratio,
                    target_ratio
                );
                ActionOutcome::skipped()
            }
            AgentAction::AdjustRange { spread_pct } => {
                tracing::info!(
                    "[executor] {} would adjust range for spread {:.2}%, not yet supported",
                    sub.smart_account,
                    spread_pct
                );
                ActionOutcome::skipped()
            }
            AgentAction::Hold => {
                tracing::debug!("[executor] {} holding", sub.smart_account);
                ActionOutcome::skipped()
            }
        }
    }

    async fn collect(
        &self,
        sub: &Subscription,
        before: &PositionSnapshot,
        agent: &AgentConfig,
    ) -> ActionOutcome {
        let Some(token_id) = sub.position_token_id else {
            tracing::debug!(
                "[executor] {} has no known position id, skipping collect",
                sub.smart_account
            );
            return ActionOutcome::skipped();
        };
        if !before.has_position {
            tracing::debug!(
                "[executor] {} has no open position, skipping collect",
                sub.smart_account
            );
            return ActionOutcome::skipped();
        }

        let calls = self.calldata.build(&CallIntent::Collect {
            position_token_id: token_id,
            recipient: sub.smart_account.clone(),
        });
        if let Some(outcome) = self.submit(sub, &calls).await {
            return outcome;
        }

        // Re-read to compute what the collect actually moved.
        let after = match self
            .positions
            .snapshot(&sub.smart_account, sub.position_token_id)
            .await
        {
            Ok(after) => after,
            Err(err) => {
                return ActionOutcome {
                    executed: true,
                    collected_usd: None,
                    error: Some(format!("post-collect snapshot failed: {err:#}")),
                }
            }
        };

        let delta0 = after.token0_balance.saturating_sub(before.token0_balance);
        let delta1 = after.token1_balance.saturating_sub(before.token1_balance);
        let collected_usd = before.to_usd(delta0, delta1);

        if collected_usd > 0.0 {
            let fee_usd = collected_usd * agent.fee_bps as f64 / 10_000.0;
            self.fees
                .track_fee(&agent.agent_ens, &sub.smart_account, fee_usd);
        }
        if let Err(err) = self
            .db
            .record_action(&sub.smart_account, collected_usd, 0.0, 0.0)
        {
            tracing::warn!("[executor] failed to record collect totals: {err:#}");
        }

        tracing::info!(
            "[executor] {} collected ${:.4}",
            sub.smart_account,
            collected_usd
        );
        ActionOutcome {
            executed: true,
            collected_usd: Some(collected_usd),
            error: None,
        }
    }

    async fn compound(
        &self,
        sub: &Subscription,
        decision_percent: f64,
        before: &PositionSnapshot,
    ) -> ActionOutcome {
        let percent = if decision_percent > 0.0 {
            decision_percent
        } else {
            sub.compound_percent
        };
        if percent <= 0.0 {
            return ActionOutcome::skipped();
        }
        if before.wallet_usd < MIN_COMPOUND_USD {
            tracing::debug!(
                "[executor] {} wallet ${:.2} below compound floor",
                sub.smart_account,
                before.wallet_usd
            );
            return ActionOutcome::skipped();
        }

        let amount0 = portion(before.token0_balance, percent);
        let amount1 = portion(before.token1_balance, percent);
        if amount0 == 0 && amount1 == 0 {
            return ActionOutcome::skipped();
        }

        let calls = self.calldata.build(&CallIntent::AddLiquidity {
            position_token_id: sub.position_token_id,
            amount0,
            amount1,
        });
        if let Some(outcome) = self.submit(sub, &calls).await {
            return outcome;
        }

        let compounded_usd = before.to_usd(amount0, amount1);
        if let Err(err) = self
            .db
            .record_action(&sub.smart_account, 0.0, compounded_usd, 0.0)
        {
            tracing::warn!("[executor] failed to record compound totals: {err:#}");
        }

        tracing::info!(
            "[executor] {} compounded {}% (${:.4})",
            sub.smart_account,
            percent,
            compounded_usd
        );
        ActionOutcome {
            executed: true,
            collected_usd: None,
            error: None,
        }
    }

    async fn distribute(
        &self,
        sub: &Subscription,
        decision_percent: f64,
        decision_destination: Option<&str>,
        before: &PositionSnapshot,
    ) -> ActionOutcome {
        let percent = if decision_percent > 0.0 {
            decision_percent
        } else {
            sub.distribute_percent
        };
        let destination = decision_destination
            .map(str::to_string)
            .or_else(|| sub.distribution_destination.clone());
        let Some(destination) = destination else {
            tracing::debug!(
                "[executor] {} has no payout destination, skipping distribute",
                sub.smart_account
            );
            return ActionOutcome::skipped();
        };
        if percent <= 0.0 {
            return ActionOutcome::skipped();
        }

        let amount0 = portion(before.token0_balance, percent);
        let amount1 = portion(before.token1_balance, percent);

        // One transfer per non-zero leg, submitted as one batch.
        let mut calls: Vec<Call> = Vec::new();
        if amount0 > 0 {
            calls.extend(self.calldata.build(&CallIntent::Transfer {
                token: TokenLeg::Token0,
                to: destination.clone(),
                amount: amount0,
            }));
        }
        if amount1 > 0 {
            calls.extend(self.calldata.build(&CallIntent::Transfer {
                token: TokenLeg::Token1,
                to: destination.clone(),
                amount: amount1,
            }));
        }
        if calls.is_empty() {
            return ActionOutcome::skipped();
        }

        if let Some(outcome) = self.submit(sub, &calls).await {
            return outcome;
        }

        let distributed_usd = before.to_usd(amount0, amount1);
        if let Err(err) = self
            .db
            .record_action(&sub.smart_account, 0.0, 0.0, distributed_usd)
        {
            tracing::warn!("[executor] failed to record distribute totals: {err:#}");
        }

        tracing::info!(
            "[executor] {} distributed {}% (${:.4}) to {}",
            sub.smart_account,
            percent,
            distributed_usd,
            destination
        );
        ActionOutcome {
            executed: true,
            collected_usd: None,
            error: None,
        }
    }

    /// Submit a batch once. Returns the failure outcome when the submission
    /// did not land, `None` when it did.
    async fn submit(&self, sub: &Subscription, calls: &[Call]) -> Option<ActionOutcome> {
        match self.submitter.submit(sub, calls).await {
            Ok(result) if result.success => {
                if let Some(tx_hash) = result.tx_hash {
                    tracing::debug!("[executor] {} submitted {tx_hash}", sub.smart_account);
                }
                None
            }
            Ok(result) => Some(ActionOutcome::failed(
                result
                    .error
                    .unwrap_or_else(|| "submission reported failure".to_string()),
            )),
            Err(err) => Some(ActionOutcome::failed(format!("{err:#}"))),
        }
    }
}

fn portion(amount: u128, percent: f64) -> u128 {
    if percent <= 0.0 {
        return 0;
    }
    let bps = (percent.min(100.0) * 100.0).round() as u128;
    (amount / 10_000) * bps + (amount % 10_000) * bps / 10_000
}
