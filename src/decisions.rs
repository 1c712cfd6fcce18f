//! Decision engine: hosted model first, deterministic rules as the floor.
//!
//! `agent_decisions` never fails. Any reasoning-client error, an empty plan,
//! or a plan where nothing survives translation lands on the rule set, so
//! the position runner always receives an executable plan.

use std::sync::Arc;

use crate::reasoning::{translate_decision, ReasoningClient, MAX_AI_DECISIONS};
use crate::rules::rule_based_decisions;
use crate::types::{AgentDecision, AgentResponse, DecisionContext, DecisionOrigin};

pub struct DecisionEngine {
    reasoning: Arc<dyn ReasoningClient>,
}

impl DecisionEngine {
    pub fn new(reasoning: Arc<dyn ReasoningClient>) -> Self {
        Self { reasoning }
    }

    pub async fn agent_decisions(&self, ctx: &DecisionContext) -> AgentResponse {
        match self.reasoning.decide(ctx).await {
            Ok(raw) => {
                let decisions: Vec<AgentDecision> = raw
                    .decisions
                    .iter()
                    .take(MAX_AI_DECISIONS)
                    .filter_map(translate_decision)
                    .collect();
                if decisions.is_empty() {
                    tracing::warn!(
                        "[decisions] model returned no usable decisions for {}, using rules",
                        ctx.subscription.smart_account
                    );
                    return self.fallback(ctx);
                }
                AgentResponse {
                    decisions,
                    source: DecisionOrigin::Ai,
                    reasoning: raw.reasoning.unwrap_or_default(),
                }
            }
            Err(err) => {
                tracing::warn!(
                    "[decisions] reasoning client failed for {}: {err:#}, using rules",
                    ctx.subscription.smart_account
                );
                self.fallback(ctx)
            }
        }
    }

    fn fallback(&self, ctx: &DecisionContext) -> AgentResponse {
        AgentResponse {
            decisions: rule_based_decisions(ctx),
            source: DecisionOrigin::Rules,
            reasoning: "deterministic rule evaluation".to_string(),
        }
    }
}
