//! Price monitor for open positions.
//!
//! Every tick collects the symbols with an active trailing stop or adaptive
//! take-profit, fetches one price per symbol, and feeds it to both engines.
//! A failed quote skips that symbol for the tick; the loop itself only ends on
//! cancellation.

use chrono::Utc;
use futures_util::future::join_all;
use pipeline_core::types::{Notification, NotificationKind};
use risk_manager::{RegimeChange, StopAdvance};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cycle::Pipeline;
use crate::events::PipelineEvent;

/// What one monitor tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub symbols: usize,
    pub priced: usize,
    pub failed: usize,
    pub stop_advances: usize,
    pub regime_changes: usize,
}

enum Observation {
    Priced {
        advances: Vec<StopAdvance>,
        changes: Vec<RegimeChange>,
    },
    Failed,
}

impl Pipeline {
    /// Symbols with at least one active risk record, sorted.
    pub fn monitored_symbols(&self) -> Vec<String> {
        let mut symbols = self.trailing.active_symbols();
        symbols.extend(self.adaptive.active_symbols());
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// One pass over every monitored symbol.
    pub async fn monitor_tick(&self) -> MonitorReport {
        let symbols = self.monitored_symbols();
        let mut report = MonitorReport {
            symbols: symbols.len(),
            ..MonitorReport::default()
        };
        if symbols.is_empty() {
            return report;
        }

        let observations = join_all(symbols.iter().map(|symbol| self.observe(symbol))).await;
        for observation in observations {
            match observation {
                Observation::Priced { advances, changes } => {
                    report.priced += 1;
                    report.stop_advances += advances.len();
                    report.regime_changes += changes.len();
                    for advance in advances {
                        self.events.publish(PipelineEvent::StopAdvanced(advance));
                    }
                    for change in changes {
                        self.notify_regime_change(&change);
                        self.events.publish(PipelineEvent::RegimeChanged(change));
                    }
                }
                Observation::Failed => report.failed += 1,
            }
        }

        debug!(
            symbols = report.symbols,
            failed = report.failed,
            stop_advances = report.stop_advances,
            regime_changes = report.regime_changes,
            "Monitor tick complete"
        );
        report
    }

    async fn observe(&self, symbol: &str) -> Observation {
        let snapshot = match self.providers.market.current_price(symbol).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Price fetch failed, skipping symbol this tick");
                return Observation::Failed;
            }
        };
        if snapshot.price <= Decimal::ZERO {
            warn!(symbol = %symbol, price = %snapshot.price, "Non-positive price, skipping symbol this tick");
            return Observation::Failed;
        }

        let advances = self.trailing.on_price_update(symbol, snapshot.price).await;
        let changes = self
            .adaptive
            .on_price_update(symbol, snapshot.price, snapshot.volume, Utc::now())
            .await;
        Observation::Priced { advances, changes }
    }

    fn notify_regime_change(&self, change: &RegimeChange) {
        let notification = Notification::new(
            NotificationKind::RegimeChanged,
            &change.symbol,
            change.position_id,
            format!(
                "{} regime {} -> {}: targets {} / {} / {} / {}",
                change.symbol,
                change.from,
                change.to,
                change.ladder.tp1,
                change.ladder.tp2,
                change.ladder.tp3,
                change.ladder.tp4
            ),
        );
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notification).await {
                warn!(position_id = %notification.position_id, error = %e, "Notification delivery failed");
            }
        });
    }
}

/// Tick until `shutdown` is cancelled. The first tick fires immediately.
pub async fn run_monitor(pipeline: Arc<Pipeline>, shutdown: CancellationToken) {
    let period = Duration::from_secs(pipeline.settings.monitor_tick_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = period.as_secs(), "Monitor loop started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Monitor loop received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                pipeline.monitor_tick().await;
            }
        }
    }
}
