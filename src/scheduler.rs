//! Background schedules.
//!
//! Two independent tokio tasks: the position pass and the daily settlement
//! sweep. `tokio::time::interval` fires immediately, so both run once at
//! startup before settling into their cadence. A failed tick is logged and
//! the loop keeps going; nothing here is allowed to kill the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::runner::PositionRunner;
use crate::settlement::SettlementEngine;

pub struct Scheduler {
    runner: Arc<PositionRunner>,
    settlement: Arc<SettlementEngine>,
    position_interval: Duration,
    settlement_interval: Duration,
}

impl Scheduler {
    pub fn new(
        runner: Arc<PositionRunner>,
        settlement: Arc<SettlementEngine>,
        position_interval: Duration,
        settlement_interval: Duration,
    ) -> Self {
        Self {
            runner,
            settlement,
            position_interval,
            settlement_interval,
        }
    }

    /// Spawn both loops and return their handles.
    pub fn start(self) -> Vec<JoinHandle<()>> {
        let position = {
            let runner = self.runner.clone();
            let period = self.position_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    tracing::info!("[scheduler] position pass starting");
                    if let Err(err) = runner.run_pass().await {
                        tracing::error!("[scheduler] position pass failed: {err:#}");
                    }
                }
            })
        };

        let settlement = {
            let settlement = self.settlement.clone();
            let period = self.settlement_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    tracing::info!("[scheduler] settlement sweep starting");
                    if let Err(err) = settlement.run_settlement().await {
                        tracing::error!("[scheduler] settlement sweep failed: {err:#}");
                    }
                }
            })
        };

        vec![position, settlement]
    }
}
