//! Hosted reasoning-model client.
//!
//! The model is asked for a JSON action plan against a bounded schema; its
//! raw response is translated into the typed action sum at this boundary and
//! anything malformed is dropped during translation. The decision engine
//! treats any failure here as a signal to fall back to the rule set.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::types::{AgentAction, AgentDecision, DecisionContext};

/// Hard cap on decisions accepted from one model response.
pub const MAX_AI_DECISIONS: usize = 8;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Raw, untrusted model output. Fields stay loosely typed until translation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAgentResponse {
    #[serde(default)]
    pub decisions: Vec<Value>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn decide(&self, ctx: &DecisionContext) -> Result<RawAgentResponse>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenRouter-style chat-completions client.
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenRouterClient {
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ReasoningClient for OpenRouterClient {
    async fn decide(&self, ctx: &DecisionContext) -> Result<RawAgentResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENROUTER_API_KEY is not configured"))?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt().to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_context_prompt(ctx),
                },
            ],
            temperature: 0.2,
            max_tokens: 1024,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("reasoning request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("reasoning request returned {status}: {body}"));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("reasoning response was not valid JSON")?;
        let content = chat
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| anyhow!("reasoning response had no choices"))?;

        serde_json::from_str(strip_code_fences(content))
            .context("model content did not match the decision schema")
    }
}

fn system_prompt() -> &'static str {
    r#"You manage a concentrated liquidity position on behalf of a subscriber.
Respond with a JSON object and nothing else:
{
  "decisions": [
    {"action": "collect|compound|distribute|rebalance|adjustRange|hold",
     "reason": "<short explanation>",
     "confidence": <0-100>,
     "params": {"percent": <number>, "destination": "<address>"}}
  ],
  "reasoning": "<overall assessment>"
}
Only the listed action tags are valid. Decisions execute in list order.
Omit params fields that do not apply to an action."#
}

fn build_context_prompt(ctx: &DecisionContext) -> String {
    let sub = &ctx.subscription;
    let position = &ctx.position;
    let market = &ctx.market;

    let mut prompt = format!(
        "## Subscriber {}\nmode: {}\ncompound: {}%\ndistribute: {}%\n",
        sub.smart_account,
        sub.mode.as_str(),
        sub.compound_percent,
        sub.distribute_percent,
    );
    if let Some(destination) = &sub.distribution_destination {
        prompt.push_str(&format!("destination: {destination}\n"));
    }
    if let Some(token_id) = sub.position_token_id {
        prompt.push_str(&format!("position token id: {token_id}\n"));
    }

    prompt.push_str(&format!(
        "\n## Position\nhas position: {}\npositions: {}\ntoken0 balance: {}\ntoken1 balance: {}\nwallet value: ${:.2}\n",
        position.has_position,
        position.position_count,
        position.token0_balance,
        position.token1_balance,
        position.wallet_usd,
    ));

    prompt.push_str(&format!(
        "\n## Market\ntoken0 price: ${:.2}\ntoken1 price: ${:.4}\nspread: {:.3}%\npool APR: {:.2}%\nprotocol TVL: ${:.0}\n",
        market.token0_price_usd,
        market.token1_price_usd,
        market.spread_pct,
        market.pool_apr,
        market.protocol_tvl_usd,
    ));
    for pool in &market.comparable_aprs {
        prompt.push_str(&format!("comparable {}: {:.2}%\n", pool.name, pool.apr));
    }

    prompt.push_str("\nProduce the action plan for this pass.\n");
    prompt
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Translate one raw decision into the typed sum. Returns `None` for an
/// unrecognized action tag, a non-string reason or a non-numeric confidence;
/// the caller drops those entries.
pub fn translate_decision(raw: &Value) -> Option<AgentDecision> {
    let action_tag = raw.get("action")?.as_str()?;
    let reason = raw.get("reason")?.as_str()?.to_string();
    let confidence = raw.get("confidence")?.as_f64()?;
    let confidence = confidence.clamp(0.0, 100.0).round() as u8;
    let params = raw.get("params").cloned().unwrap_or(Value::Null);

    let action = match action_tag {
        "collect" => AgentAction::Collect,
        "compound" => AgentAction::Compound {
            percent: param_f64(&params, "percent").unwrap_or(0.0),
        },
        "distribute" => AgentAction::Distribute {
            percent: param_f64(&params, "percent").unwrap_or(0.0),
            destination: params
                .get("destination")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        "rebalance" => AgentAction::Rebalance {
            current_ratio: param_f64(&params, "currentRatio").unwrap_or(0.0),
            target_ratio: param_f64(&params, "targetRatio").unwrap_or(0.5),
        },
        "adjustRange" => AgentAction::AdjustRange {
            spread_pct: param_f64(&params, "spreadPct").unwrap_or(0.0),
        },
        "hold" => AgentAction::Hold,
        _ => return None,
    };

    Some(AgentDecision {
        action,
        reason,
        confidence,
    })
}

fn param_f64(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}
