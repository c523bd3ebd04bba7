//! Pipeline state-change events.
//!
//! Every stage publishes onto an in-process broadcast bus. Observers subscribe
//! independently; a slow or dropped observer never blocks the pipeline. The
//! optional [`RedisForwarder`] mirrors the bus onto Redis pub/sub channels.

use anyhow::Result;
use pipeline_core::types::{Analysis, Decision, Opportunity};
use redis::AsyncCommands;
use risk_manager::{RegimeChange, StopAdvance};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cycle::CycleReport;

/// Redis channels for pub/sub.
pub mod channels {
    pub const OPPORTUNITIES: &str = "pipeline:opportunities";
    pub const ANALYSES: &str = "pipeline:analyses";
    pub const DECISIONS: &str = "pipeline:decisions";
    pub const CYCLES: &str = "pipeline:cycles";
    pub const STOPS: &str = "risk:stops";
    pub const REGIMES: &str = "risk:regimes";
}

/// A state change somewhere in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    OpportunityFound(Opportunity),
    AnalysisProduced(Analysis),
    DecisionMade(Decision),
    CycleCompleted(CycleReport),
    StopAdvanced(StopAdvance),
    RegimeChanged(RegimeChange),
}

impl PipelineEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            PipelineEvent::OpportunityFound(_) => channels::OPPORTUNITIES,
            PipelineEvent::AnalysisProduced(_) => channels::ANALYSES,
            PipelineEvent::DecisionMade(_) => channels::DECISIONS,
            PipelineEvent::CycleCompleted(_) => channels::CYCLES,
            PipelineEvent::StopAdvanced(_) => channels::STOPS,
            PipelineEvent::RegimeChanged(_) => channels::REGIMES,
        }
    }
}

/// Broadcast bus for [`PipelineEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to every current subscriber. Having none is not an error.
    pub fn publish(&self, event: PipelineEvent) {
        let channel = event.channel();
        match self.tx.send(event) {
            Ok(receivers) => debug!(channel, receivers, "Published pipeline event"),
            Err(_) => debug!(channel, "No subscribers for pipeline event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Forwards bus events to Redis pub/sub.
pub struct RedisForwarder {
    redis: redis::aio::ConnectionManager,
}

impl RedisForwarder {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let redis = redis::aio::ConnectionManager::new(client).await?;
        info!("Connected to Redis for event forwarding");
        Ok(Self { redis })
    }

    async fn forward(&mut self, event: &PipelineEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let _: () = self.redis.publish(event.channel(), &payload).await?;
        Ok(())
    }

    /// Forward until cancelled or the bus closes. Publish failures are logged
    /// and the event dropped.
    pub async fn run(mut self, mut rx: broadcast::Receiver<PipelineEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Redis forwarder stopping");
                    break;
                }
                received = rx.recv() => match received {
                    Ok(event) => {
                        if let Err(e) = self.forward(&event).await {
                            warn!(channel = event.channel(), error = %e, "Failed to forward event to Redis");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Redis forwarder lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
