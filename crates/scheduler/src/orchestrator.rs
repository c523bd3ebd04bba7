//! Scheduler lifecycle and control surface.
//!
//! `STOPPED → RUNNING → STOPPED`. While running, two tasks share one
//! cancellation token: the cycle loop (one full cycle per interval, first
//! immediately) and the monitor loop. Stopping cancels the token and waits
//! for both, so an in-flight cycle drains before `stop` returns.

use anyhow::Result;
use risk_manager::{AdaptiveTpRecord, RiskError, TrailingStatus, TrailingStopRecord};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trading_engine::ExecutionMetrics;
use uuid::Uuid;

use crate::cycle::{CycleReport, Pipeline};
use crate::events::PipelineEvent;
use crate::monitor::run_monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,
}

struct RunningTasks {
    shutdown: CancellationToken,
    cycle: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

/// Owns the pipeline and its background loops.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    tasks: Mutex<Option<RunningTasks>>,
    last_cycle: Arc<RwLock<Option<CycleReport>>>,
}

impl Scheduler {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            tasks: Mutex::new(None),
            last_cycle: Arc::new(RwLock::new(None)),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.pipeline.events().subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        let tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if tasks.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Spawn the cycle and monitor loops.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if tasks.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let cycle = tokio::spawn(run_cycles(
            self.pipeline.clone(),
            self.last_cycle.clone(),
            shutdown.clone(),
        ));
        let monitor = tokio::spawn(run_monitor(self.pipeline.clone(), shutdown.clone()));

        *tasks = Some(RunningTasks {
            shutdown,
            cycle,
            monitor,
        });
        info!(
            cycle_interval_secs = self.pipeline.settings().cycle_interval_secs,
            monitor_tick_secs = self.pipeline.settings().monitor_tick_secs,
            "Scheduler started"
        );
        Ok(())
    }

    /// Cancel both loops and wait for them to finish.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let running = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            tasks.take().ok_or(SchedulerError::NotRunning)?
        };

        running.shutdown.cancel();
        for (name, handle) in [("cycle", running.cycle), ("monitor", running.monitor)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Background task ended abnormally");
            }
        }
        info!("Scheduler stopped");
        Ok(())
    }

    /// Run a single cycle on the caller's task, independent of the loop.
    pub async fn run_cycle_once(&self) -> CycleReport {
        let report = self.pipeline.run_cycle().await;
        store_report(&self.last_cycle, &report);
        report
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Order counts, notional and latency since startup.
    pub fn execution_metrics(&self) -> ExecutionMetrics {
        self.pipeline.executor().metrics()
    }

    pub async fn trailing_for_symbol(&self, symbol: &str) -> Vec<TrailingStopRecord> {
        self.pipeline.trailing().for_symbol(symbol).await
    }

    pub async fn trailing_for_position(&self, position_id: Uuid) -> Option<TrailingStopRecord> {
        self.pipeline.trailing().get(position_id).await
    }

    pub async fn adaptive_for_position(&self, position_id: Uuid) -> Option<AdaptiveTpRecord> {
        self.pipeline.adaptive().get(position_id).await
    }

    /// Stop managing a position without touching the exchange.
    pub async fn cancel_record(&self, position_id: Uuid) -> Result<TrailingStopRecord, RiskError> {
        let record = self.pipeline.trailing().cancel(position_id).await?;
        self.pipeline.adaptive().remove(position_id);
        info!(position_id = %position_id, symbol = %record.symbol, "Risk records cancelled");
        Ok(record)
    }

    /// Flatten the exchange position and retire both risk records with
    /// `status` (FILLED or CANCELLED).
    pub async fn close_position(&self, position_id: Uuid, status: TrailingStatus) -> Result<TrailingStopRecord> {
        if !status.is_terminal() {
            return Err(RiskError::NotTerminal(status.to_string()).into());
        }
        let symbol = self
            .pipeline
            .trailing()
            .get(position_id)
            .await
            .map(|r| r.symbol)
            .ok_or(RiskError::NotFound(position_id))?;

        self.pipeline.executor().close(&symbol).await?;
        let record = self.pipeline.trailing().close(position_id, status).await?;
        self.pipeline.adaptive().remove(position_id);

        info!(position_id = %position_id, symbol = %symbol, status = %status, "Position closed");
        Ok(record)
    }
}

fn store_report(slot: &RwLock<Option<CycleReport>>, report: &CycleReport) {
    let mut last = slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *last = Some(report.clone());
}

async fn run_cycles(
    pipeline: Arc<Pipeline>,
    last_cycle: Arc<RwLock<Option<CycleReport>>>,
    shutdown: CancellationToken,
) {
    let period = Duration::from_secs(pipeline.settings().cycle_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = period.as_secs(), "Cycle loop started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Cycle loop received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                let report = pipeline.run_cycle().await;
                if report.scanned == 0 {
                    warn!("Cycle found no opportunities");
                }
                store_report(&last_cycle, &report);
            }
        }
    }
}
