//! In-memory fee accumulator.
//!
//! Management fees earned per decision-source identity pile up here between
//! settlements. Process memory only: a restart loses unsettled fees, which is
//! acceptable at demo scope and called out on the settlement side.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Any single agent reaching this total triggers a settlement pass.
pub const SETTLEMENT_THRESHOLD_USD: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeEntry {
    pub agent_ens: String,
    pub smart_account: String,
    pub amount_usd: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentFees {
    pub total_usd: f64,
    pub entries: Vec<FeeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSummaryRow {
    pub agent_ens: String,
    pub total_usd: f64,
    pub entry_count: usize,
}

#[derive(Default)]
pub struct FeeAccumulator {
    inner: RwLock<HashMap<String, AgentFees>>,
}

impl FeeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_fee(&self, agent_ens: &str, smart_account: &str, amount_usd: f64) {
        let mut inner = self.inner.write();
        let fees = inner.entry(agent_ens.to_string()).or_default();
        fees.total_usd += amount_usd;
        fees.entries.push(FeeEntry {
            agent_ens: agent_ens.to_string(),
            smart_account: smart_account.to_string(),
            amount_usd,
            timestamp: Utc::now(),
        });
        tracing::debug!(
            "[fees] {} +${:.4} for {} (total ${:.4})",
            agent_ens,
            amount_usd,
            smart_account,
            fees.total_usd
        );
    }

    /// True once any single agent's running total reaches the threshold.
    /// The settlement pass that follows flushes every agent, not just the
    /// one that crossed the bar.
    pub fn should_settle(&self) -> bool {
        self.inner
            .read()
            .values()
            .any(|fees| fees.total_usd >= SETTLEMENT_THRESHOLD_USD)
    }

    /// Defensive copy of the full accumulator state.
    pub fn accumulated_fees(&self) -> HashMap<String, AgentFees> {
        self.inner.read().clone()
    }

    pub fn fee_summary(&self) -> Vec<FeeSummaryRow> {
        let inner = self.inner.read();
        let mut rows: Vec<FeeSummaryRow> = inner
            .iter()
            .map(|(agent, fees)| FeeSummaryRow {
                agent_ens: agent.clone(),
                total_usd: fees.total_usd,
                entry_count: fees.entries.len(),
            })
            .collect();
        rows.sort_by(|a, b| a.agent_ens.cmp(&b.agent_ens));
        rows
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}
