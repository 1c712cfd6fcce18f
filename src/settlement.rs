//! Settlement of accumulated fees.
//!
//! The flush step is an injected strategy so the shipped log-only sink can be
//! swapped for a state-channel batch-settle submission without touching the
//! accumulator or the position runner. A real sink must be idempotent and
//! confirm submission before the accumulator is cleared; clearing only after
//! the sink accepts is what keeps fee records from being lost on a crash
//! mid-settlement.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fees::{FeeAccumulator, FeeSummaryRow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSummary {
    /// Identifier tying log lines and sink submissions to one batch.
    pub batch_id: String,
    pub rows: Vec<FeeSummaryRow>,
    pub grand_total_usd: f64,
}

/// Terminal destination for a settlement batch.
#[async_trait]
pub trait SettlementSink: Send + Sync {
    async fn settle(&self, summary: &SettlementSummary) -> Result<()>;
}

/// Stub sink: logs the batch it would submit on-chain.
pub struct LogSettlementSink;

#[async_trait]
impl SettlementSink for LogSettlementSink {
    async fn settle(&self, summary: &SettlementSummary) -> Result<()> {
        for row in &summary.rows {
            tracing::info!(
                "[settlement] batch {} {}: ${:.4} across {} entries",
                summary.batch_id,
                row.agent_ens,
                row.total_usd,
                row.entry_count
            );
        }
        tracing::info!(
            "[settlement] batch {} grand total ${:.4} across {} agents",
            summary.batch_id,
            summary.grand_total_usd,
            summary.rows.len()
        );
        Ok(())
    }
}

pub struct SettlementEngine {
    fees: Arc<FeeAccumulator>,
    sink: Arc<dyn SettlementSink>,
}

impl SettlementEngine {
    pub fn new(fees: Arc<FeeAccumulator>, sink: Arc<dyn SettlementSink>) -> Self {
        Self { fees, sink }
    }

    /// Flush all accumulated fees through the sink, then clear. No-op when
    /// nothing has accrued. The accumulator is cleared only after the sink
    /// accepted the batch.
    pub async fn run_settlement(&self) -> Result<()> {
        let rows = self.fees.fee_summary();
        if rows.is_empty() {
            tracing::debug!("[settlement] nothing to settle");
            return Ok(());
        }

        let grand_total_usd = rows.iter().map(|row| row.total_usd).sum();
        let summary = SettlementSummary {
            batch_id: uuid::Uuid::new_v4().to_string(),
            rows,
            grand_total_usd,
        };
        self.sink.settle(&summary).await?;
        self.fees.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingSink {
        batches: Mutex<Vec<SettlementSummary>>,
    }

    #[async_trait]
    impl SettlementSink for RecordingSink {
        async fn settle(&self, summary: &SettlementSummary) -> Result<()> {
            self.batches.lock().push(summary.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl SettlementSink for FailingSink {
        async fn settle(&self, _summary: &SettlementSummary) -> Result<()> {
            anyhow::bail!("submission rejected")
        }
    }

    #[tokio::test]
    async fn settlement_flushes_all_agents_and_clears() {
        let fees = Arc::new(FeeAccumulator::new());
        fees.track_fee("a.eth", "0x1", 12.0);
        fees.track_fee("b.eth", "0x2", 0.5);
        assert!(fees.should_settle());

        let sink = Arc::new(RecordingSink {
            batches: Mutex::new(Vec::new()),
        });
        let engine = SettlementEngine::new(fees.clone(), sink.clone());
        engine.run_settlement().await.expect("settlement succeeds");

        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 1);
        // One agent crossing the bar flushes everyone.
        assert_eq!(batches[0].rows.len(), 2);
        assert!((batches[0].grand_total_usd - 12.5).abs() < 1e-12);

        assert!(fees.accumulated_fees().is_empty());
        assert!(!fees.should_settle());
    }

    #[tokio::test]
    async fn empty_accumulator_is_a_noop() {
        let fees = Arc::new(FeeAccumulator::new());
        let sink = Arc::new(RecordingSink {
            batches: Mutex::new(Vec::new()),
        });
        let engine = SettlementEngine::new(fees, sink.clone());
        engine.run_settlement().await.expect("noop succeeds");
        assert!(sink.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_keeps_fee_records() {
        let fees = Arc::new(FeeAccumulator::new());
        fees.track_fee("a.eth", "0x1", 12.0);

        let engine = SettlementEngine::new(fees.clone(), Arc::new(FailingSink));
        assert!(engine.run_settlement().await.is_err());
        // Records survive a failed flush so the next pass can retry.
        assert!(!fees.accumulated_fees().is_empty());
    }
}
