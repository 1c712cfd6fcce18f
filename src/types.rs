//! Domain types shared across the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Units of the two pool legs. The volatile leg uses 18 decimals and is
/// valued at the snapshot reference price; the quote leg is a 6-decimal
/// stable asset valued 1:1.
pub const TOKEN0_UNIT: f64 = 1e18;
pub const TOKEN1_UNIT: f64 = 1e6;

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    PendingDeposit,
    CreatingPosition,
    Error,
    Revoked,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::PendingDeposit => "pending_deposit",
            Self::CreatingPosition => "creating_position",
            Self::Error => "error",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "pending_deposit" => Some(Self::PendingDeposit),
            "creating_position" => Some(Self::CreatingPosition),
            "error" => Some(Self::Error),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// How harvested yield is split between reinvestment and payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    Compound,
    Distribute,
    Mixed,
}

impl DistributionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compound => "compound",
            Self::Distribute => "distribute",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "compound" => Some(Self::Compound),
            "distribute" => Some(Self::Distribute),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }
}

/// One subscriber's configuration and running totals.
///
/// Keyed by the lowercased delegated smart-account address. Revocation is a
/// status transition that clears the session key, never a row delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub owner: String,
    pub smart_account: String,
    /// Delegated signing-key material, held for the execution relay.
    /// Cleared when the subscription is revoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// ENS name of the decision source the subscriber picked.
    pub agent_ens: String,
    pub mode: DistributionMode,
    pub compound_percent: f64,
    pub distribute_percent: f64,
    pub distribution_destination: Option<String>,
    pub destination_chain: Option<u64>,
    pub position_token_id: Option<u64>,
    pub status: SubscriptionStatus,
    pub last_action_at: Option<DateTime<Utc>>,
    pub total_collected_usd: f64,
    pub total_compounded_usd: f64,
    pub total_distributed_usd: f64,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn account_key(&self) -> String {
        self.smart_account.to_lowercase()
    }
}

/// Point-in-time read of a subscriber's on-chain holdings.
/// Immutable once constructed; a fresh one is taken around every
/// state-changing action so deltas can be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Raw balance of the volatile pool leg (18 decimals).
    pub token0_balance: u128,
    /// Raw balance of the stable pool leg (6 decimals).
    pub token1_balance: u128,
    /// Raw balance of the stable asset held outside the pool.
    pub stable_balance: u128,
    pub has_position: bool,
    pub position_count: u32,
    pub wallet_usd: f64,
    /// Price of token0 in USD used for every conversion off this snapshot.
    pub reference_price: f64,
}

impl PositionSnapshot {
    pub fn empty() -> Self {
        Self {
            token0_balance: 0,
            token1_balance: 0,
            stable_balance: 0,
            has_position: false,
            position_count: 0,
            wallet_usd: 0.0,
            reference_price: 0.0,
        }
    }

    /// USD value of a pair of raw deltas at this snapshot's reference price.
    pub fn to_usd(&self, amount0: u128, amount1: u128) -> f64 {
        (amount0 as f64 / TOKEN0_UNIT) * self.reference_price + amount1 as f64 / TOKEN1_UNIT
    }
}

/// Cached external market snapshot. Refreshed lazily, tolerates staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub token0_price_usd: f64,
    pub token1_price_usd: f64,
    /// Pairwise spread between the two pool assets, in percent.
    pub spread_pct: f64,
    /// The pool's own yield estimate, in percent.
    pub pool_apr: f64,
    /// Yields of comparable pools, keyed by pool name.
    #[serde(default)]
    pub comparable_aprs: Vec<ComparablePool>,
    pub protocol_tvl_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparablePool {
    pub name: String,
    pub apr: f64,
}

/// One planned action, with strongly-typed parameters per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AgentAction {
    Collect,
    Compound {
        percent: f64,
    },
    Distribute {
        percent: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
    },
    Rebalance {
        current_ratio: f64,
        target_ratio: f64,
    },
    AdjustRange {
        spread_pct: f64,
    },
    Hold,
}

impl AgentAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Compound { .. } => "compound",
            Self::Distribute { .. } => "distribute",
            Self::Rebalance { .. } => "rebalance",
            Self::AdjustRange { .. } => "adjustRange",
            Self::Hold => "hold",
        }
    }

    /// Whether a successful execution of this action moves balances, which
    /// forces a re-snapshot before the next decision runs.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Collect | Self::Compound { .. } | Self::Distribute { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    #[serde(flatten)]
    pub action: AgentAction,
    pub reason: String,
    /// Advisory only, 0-100.
    pub confidence: u8,
}

/// Where a decision plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    Ai,
    Rules,
}

/// Ordered decision plan for one subscriber, produced once per loop tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub decisions: Vec<AgentDecision>,
    pub source: DecisionOrigin,
    pub reasoning: String,
}

/// Everything the decision source looks at for one subscriber.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub subscription: Subscription,
    pub position: PositionSnapshot,
    pub market: MarketData,
}

/// Per-decision-source execution parameters resolved for one pass.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_ens: String,
    /// Management fee charged on collected yield, in basis points.
    pub fee_bps: u32,
}

impl AgentConfig {
    pub fn for_agent(agent_ens: &str, fee_bps: u32) -> Self {
        Self {
            agent_ens: agent_ens.to_string(),
            fee_bps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Paused,
            SubscriptionStatus::PendingDeposit,
            SubscriptionStatus::CreatingPosition,
            SubscriptionStatus::Error,
            SubscriptionStatus::Revoked,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubscriptionStatus::parse("unknown"), None);
    }

    #[test]
    fn snapshot_usd_conversion_values_both_legs() {
        let snapshot = PositionSnapshot {
            reference_price: 2000.0,
            ..PositionSnapshot::empty()
        };
        // 0.5 token0 at $2000 plus 250 stable units.
        let usd = snapshot.to_usd(500_000_000_000_000_000, 250_000_000);
        assert!((usd - 1250.0).abs() < 1e-9);
    }

    #[test]
    fn mutating_actions_are_the_balance_moving_ones() {
        assert!(AgentAction::Collect.is_mutating());
        assert!(AgentAction::Compound { percent: 50.0 }.is_mutating());
        assert!(AgentAction::Distribute {
            percent: 50.0,
            destination: None
        }
        .is_mutating());
        assert!(!AgentAction::Hold.is_mutating());
        assert!(!AgentAction::Rebalance {
            current_ratio: 0.8,
            target_ratio: 0.5
        }
        .is_mutating());
    }
}
