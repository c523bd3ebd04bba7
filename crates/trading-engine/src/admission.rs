//! Admission control between pipeline stages.
//!
//! Two independent checks:
//! - the dedup gate, which skips work already done for a symbol inside the
//!   rolling window (backed by the [`RecordStore`]);
//! - the escalation criteria, which decide whether an analysis is worth a
//!   decision-stage call.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use pipeline_core::config::AdmissionConfig;
use pipeline_core::db::{RecordKind, RecordStore, StoredRecord};
use pipeline_core::types::{Analysis, Opportunity};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One of the five escalation signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationSignal {
    HighConfidence,
    ResolvedContradiction,
    DominantPattern,
    StrongMove,
    PositiveExpectedValue,
}

/// Result of the escalation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationVerdict {
    pub admitted: bool,
    pub signals: Vec<EscalationSignal>,
    pub reason: String,
}

impl EscalationVerdict {
    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }
}

/// Dedup gate plus escalation criteria.
pub struct AdmissionGate {
    store: Arc<dyn RecordStore>,
    window: Duration,
    criteria: AdmissionConfig,
}

impl AdmissionGate {
    pub fn new(store: Arc<dyn RecordStore>, window: Duration, criteria: AdmissionConfig) -> Self {
        Self {
            store,
            window,
            criteria,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// False if a record of `kind` for `symbol` exists at or after
    /// `now - window`. Read-only.
    pub async fn should_emit(&self, kind: RecordKind, symbol: &str, now: DateTime<Utc>) -> Result<bool> {
        let since = now - self.window;
        let existing = self.store.latest_since(kind, symbol, since).await?;
        if let Some(record) = &existing {
            debug!(
                symbol = %symbol,
                kind = %kind,
                last_at = %record.created_at,
                "Within dedup window, skipping"
            );
        }
        Ok(existing.is_none())
    }

    /// Atomically store `payload` unless the window is still open. Returns
    /// whether this caller won the claim.
    pub async fn claim(
        &self,
        kind: RecordKind,
        symbol: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let record = StoredRecord::new(kind, symbol, payload, now);
        let claimed = self.store.insert_if_absent(&record, self.window).await?;
        if !claimed {
            debug!(symbol = %symbol, kind = %kind, "Dedup claim lost");
        }
        Ok(claimed)
    }

    /// Whether an analysis may proceed to the decision stage.
    ///
    /// Requires confidence at or above `min_confidence` and at least
    /// `min_signals` of the five escalation signals.
    pub fn meets_escalation_criteria(
        &self,
        analysis: &Analysis,
        opportunity: &Opportunity,
    ) -> EscalationVerdict {
        let c = &self.criteria;

        if analysis.confidence < c.min_confidence {
            return EscalationVerdict {
                admitted: false,
                signals: Vec::new(),
                reason: format!(
                    "confidence {:.2} below {:.2}, treated as hold",
                    analysis.confidence, c.min_confidence
                ),
            };
        }

        let mut signals = Vec::with_capacity(5);
        if analysis.confidence >= c.high_confidence {
            signals.push(EscalationSignal::HighConfidence);
        }
        if analysis.resolved_contradiction {
            signals.push(EscalationSignal::ResolvedContradiction);
        }
        if analysis.dominant_pattern(c.dominant_pattern_strength).is_some() {
            signals.push(EscalationSignal::DominantPattern);
        }
        let volume = opportunity.volume_24h.to_f64().unwrap_or(0.0);
        if opportunity.price_change_24h_pct.abs() >= c.min_move_pct && volume >= c.min_volume_24h {
            signals.push(EscalationSignal::StrongMove);
        }
        if let Some(rr) = analysis.risk_reward.filter(|rr| rr.is_finite()) {
            let expected = analysis.confidence * rr - (1.0 - analysis.confidence);
            if expected > c.min_expected_value {
                signals.push(EscalationSignal::PositiveExpectedValue);
            }
        }

        let admitted = signals.len() >= c.min_signals;
        let reason = format!(
            "{} of {} required signals ({:?})",
            signals.len(),
            c.min_signals,
            signals
        );
        EscalationVerdict {
            admitted,
            signals,
            reason,
        }
    }
}
