//! Deterministic decision fallback.
//!
//! An ordered list of pure predicate rules evaluated in sequence. Every rule
//! that matches contributes a decision (no short-circuit), and a trailing
//! `hold` is appended only when nothing else fired, so the plan is never
//! empty.

use crate::types::{AgentAction, AgentDecision, DecisionContext};

/// Pool-side balances below this combined USD value are treated as dust and
/// never trigger a rebalance.
pub const REBALANCE_DUST_USD: f64 = 1.0;
/// Deviation from the 50/50 target, in ratio points, that triggers a
/// rebalance.
pub const RATIO_DEVIATION_THRESHOLD: f64 = 0.05;
/// Spread magnitude, in percent, that triggers a range adjustment.
pub const SPREAD_THRESHOLD_PCT: f64 = 0.5;

const TARGET_RATIO: f64 = 0.5;

pub fn rule_based_decisions(ctx: &DecisionContext) -> Vec<AgentDecision> {
    let mut decisions = Vec::new();
    let sub = &ctx.subscription;
    let position = &ctx.position;

    if position.has_position && sub.position_token_id.is_some() {
        decisions.push(AgentDecision {
            action: AgentAction::Collect,
            reason: "open position with uncollected fees".to_string(),
            confidence: 80,
        });
    }

    if sub.distribute_percent > 0.0 && sub.distribution_destination.is_some() {
        decisions.push(AgentDecision {
            action: AgentAction::Distribute {
                percent: sub.distribute_percent,
                destination: sub.distribution_destination.clone(),
            },
            reason: format!(
                "subscriber routes {}% of yield to a payout destination",
                sub.distribute_percent
            ),
            confidence: 90,
        });
    }

    if sub.compound_percent > 0.0 {
        decisions.push(AgentDecision {
            action: AgentAction::Compound {
                percent: sub.compound_percent,
            },
            reason: format!(
                "subscriber reinvests {}% of idle balances",
                sub.compound_percent
            ),
            confidence: 90,
        });
    }

    let value0 = (position.token0_balance as f64 / crate::types::TOKEN0_UNIT)
        * ctx.market.token0_price_usd;
    let value1 = position.token1_balance as f64 / crate::types::TOKEN1_UNIT;
    let combined = value0 + value1;
    if position.token0_balance > 0 && position.token1_balance > 0 && combined > REBALANCE_DUST_USD
    {
        let current_ratio = value0 / combined;
        if (current_ratio - TARGET_RATIO).abs() > RATIO_DEVIATION_THRESHOLD {
            decisions.push(AgentDecision {
                action: AgentAction::Rebalance {
                    current_ratio,
                    target_ratio: TARGET_RATIO,
                },
                reason: format!(
                    "wallet ratio {:.2} drifted from the 50/50 target",
                    current_ratio
                ),
                confidence: 70,
            });
        }
    }

    if ctx.market.spread_pct.abs() > SPREAD_THRESHOLD_PCT {
        decisions.push(AgentDecision {
            action: AgentAction::AdjustRange {
                spread_pct: ctx.market.spread_pct,
            },
            reason: format!(
                "pool spread {:.2}% exceeds the range tolerance",
                ctx.market.spread_pct
            ),
            confidence: 50,
        });
    }

    if decisions.is_empty() {
        decisions.push(AgentDecision {
            action: AgentAction::Hold,
            reason: "no rule fired, position is healthy".to_string(),
            confidence: 95,
        });
    }

    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DistributionMode, MarketData, PositionSnapshot, Subscription, SubscriptionStatus,
    };
    use chrono::Utc;

    fn subscription() -> Subscription {
        Subscription {
            owner: "0xowner".to_string(),
            smart_account: "0xAccount".to_string(),
            session_key: Some("0xsessionkey".to_string()),
            agent_ens: "yieldmax.eth".to_string(),
            mode: DistributionMode::Mixed,
            compound_percent: 0.0,
            distribute_percent: 0.0,
            distribution_destination: None,
            destination_chain: None,
            position_token_id: None,
            status: SubscriptionStatus::Active,
            last_action_at: None,
            total_collected_usd: 0.0,
            total_compounded_usd: 0.0,
            total_distributed_usd: 0.0,
            created_at: Utc::now(),
        }
    }

    fn market() -> MarketData {
        MarketData {
            token0_price_usd: 2000.0,
            token1_price_usd: 1.0,
            spread_pct: 0.1,
            pool_apr: 12.0,
            comparable_aprs: Vec::new(),
            protocol_tvl_usd: 1_000_000.0,
        }
    }

    fn ctx(sub: Subscription, position: PositionSnapshot, market: MarketData) -> DecisionContext {
        DecisionContext {
            subscription: sub,
            position,
            market,
        }
    }

    #[test]
    fn quiet_position_holds() {
        let decisions = rule_based_decisions(&ctx(
            subscription(),
            PositionSnapshot::empty(),
            market(),
        ));
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, AgentAction::Hold);
        assert_eq!(decisions[0].confidence, 95);
    }

    #[test]
    fn mixed_subscriber_with_position_gets_collect_distribute_compound() {
        let mut sub = subscription();
        sub.compound_percent = 70.0;
        sub.distribute_percent = 30.0;
        sub.distribution_destination = Some("0xdest".to_string());
        sub.position_token_id = Some(12345);

        let position = PositionSnapshot {
            has_position: true,
            position_count: 1,
            ..PositionSnapshot::empty()
        };

        let decisions = rule_based_decisions(&ctx(sub, position, market()));
        let kinds: Vec<&str> = decisions.iter().map(|d| d.action.kind()).collect();
        assert_eq!(kinds, vec!["collect", "distribute", "compound"]);
        assert_eq!(decisions[0].confidence, 80);
        assert!(matches!(
            decisions[1].action,
            AgentAction::Distribute { percent, .. } if (percent - 30.0).abs() < 1e-9
        ));
        assert!(matches!(
            decisions[2].action,
            AgentAction::Compound { percent } if (percent - 70.0).abs() < 1e-9
        ));
    }

    #[test]
    fn skewed_balances_trigger_rebalance_toward_fifty_fifty() {
        // $80 of token0 against $20 of token1, no open position.
        let position = PositionSnapshot {
            token0_balance: 40_000_000_000_000_000, // 0.04 token0 at $2000 = $80
            token1_balance: 20_000_000,             // $20
            ..PositionSnapshot::empty()
        };

        let decisions = rule_based_decisions(&ctx(subscription(), position, market()));
        let rebalance = decisions
            .iter()
            .find(|d| matches!(d.action, AgentAction::Rebalance { .. }))
            .expect("rebalance should fire");
        match rebalance.action {
            AgentAction::Rebalance {
                current_ratio,
                target_ratio,
            } => {
                assert!((current_ratio - 0.8).abs() < 1e-9);
                assert!((target_ratio - 0.5).abs() < 1e-9);
            }
            _ => unreachable!(),
        }
        assert_eq!(rebalance.confidence, 70);
    }

    #[test]
    fn dust_balances_never_rebalance() {
        let position = PositionSnapshot {
            token0_balance: 400_000_000_000_000, // $0.80
            token1_balance: 100_000,             // $0.10
            ..PositionSnapshot::empty()
        };
        let decisions = rule_based_decisions(&ctx(subscription(), position, market()));
        assert!(decisions
            .iter()
            .all(|d| !matches!(d.action, AgentAction::Rebalance { .. })));
    }

    #[test]
    fn wide_spread_triggers_adjust_range() {
        let mut m = market();
        m.spread_pct = -0.75;
        let decisions = rule_based_decisions(&ctx(subscription(), PositionSnapshot::empty(), m));
        let adjust = decisions
            .iter()
            .find(|d| matches!(d.action, AgentAction::AdjustRange { .. }))
            .expect("adjustRange should fire");
        assert_eq!(adjust.confidence, 50);
    }

    #[test]
    fn distribute_without_destination_does_not_fire() {
        let mut sub = subscription();
        sub.distribute_percent = 25.0;
        let decisions = rule_based_decisions(&ctx(sub, PositionSnapshot::empty(), market()));
        assert!(decisions
            .iter()
            .all(|d| !matches!(d.action, AgentAction::Distribute { .. })));
    }
}
