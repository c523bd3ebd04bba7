//! Structured output of the decision stage.

use super::analysis::number_from_value;
use super::Recommendation;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Lifecycle of a decision after it leaves the decision provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Produced, not yet acted upon.
    Pending,
    /// Order placed and accepted.
    Executed,
    /// Order placement failed.
    Rejected,
    /// Hold outcome or suppressed by an admission gate.
    Skipped,
}

/// Normalised trading decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub symbol: String,
    pub analysis_id: Option<Uuid>,
    pub signal: Recommendation,
    /// Confidence (0.0 - 1.0).
    pub confidence: f64,
    /// Suggested leverage; at least 1.
    pub leverage: Decimal,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    /// Proposed take-profit ladder, nearest target first.
    pub take_profits: Vec<Decimal>,
    pub risk_reward: Option<f64>,
    pub reasoning: String,
    /// Set when contradiction resolution scored several candidates.
    #[serde(default)]
    pub resolution_applied: bool,
    pub status: DecisionStatus,
    /// Position opened for this decision, once executed.
    pub position_id: Option<Uuid>,
    #[serde(default)]
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    /// Neutral fallback: confidence 0.5, hold, leverage 1.
    pub fn neutral(symbol: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            analysis_id: None,
            signal: Recommendation::Hold,
            confidence: super::analysis::NEUTRAL_CONFIDENCE,
            leverage: Decimal::ONE,
            entry_price: None,
            stop_loss: None,
            take_profits: Vec::new(),
            risk_reward: None,
            reasoning: String::new(),
            resolution_applied: false,
            status: DecisionStatus::Pending,
            position_id: None,
            degraded: true,
            created_at: Utc::now(),
        }
    }

    /// Decode a provider payload; anything undecodable becomes neutral.
    pub fn from_value_lenient(symbol: &str, value: Value) -> Self {
        match serde_json::from_value::<DecisionPayload>(value) {
            Ok(payload) => payload.normalize(symbol),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Malformed decision payload, using neutral default");
                Self::neutral(symbol)
            }
        }
    }

    pub fn is_actionable(&self) -> bool {
        !self.signal.is_hold() && self.status == DecisionStatus::Pending
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DecisionPayload {
    signal: Option<String>,
    confidence: Option<Value>,
    leverage: Option<Value>,
    entry_price: Option<f64>,
    stop_loss: Option<f64>,
    #[serde(alias = "tp_levels")]
    take_profits: Vec<Value>,
    risk_reward: Option<f64>,
    reasoning: Option<String>,
}

impl DecisionPayload {
    fn normalize(self, symbol: &str) -> Decision {
        let confidence = self
            .confidence
            .as_ref()
            .and_then(number_from_value)
            .map(|c| if c > 1.0 { c / 100.0 } else { c })
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(super::analysis::NEUTRAL_CONFIDENCE);

        let leverage = self
            .leverage
            .as_ref()
            .and_then(number_from_value)
            .and_then(Decimal::from_f64)
            .filter(|l| *l >= Decimal::ONE)
            .unwrap_or(Decimal::ONE);

        let take_profits = self
            .take_profits
            .iter()
            .filter_map(number_from_value)
            .filter(|p| p.is_finite() && *p > 0.0)
            .filter_map(Decimal::from_f64)
            .collect();

        Decision {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            analysis_id: None,
            signal: self
                .signal
                .as_deref()
                .map(Recommendation::parse_lenient)
                .unwrap_or_default(),
            confidence,
            leverage,
            entry_price: positive_decimal(self.entry_price),
            stop_loss: positive_decimal(self.stop_loss),
            take_profits,
            risk_reward: self.risk_reward.filter(|r| r.is_finite()),
            reasoning: self.reasoning.unwrap_or_default(),
            resolution_applied: false,
            status: DecisionStatus::Pending,
            position_id: None,
            degraded: false,
            created_at: Utc::now(),
        }
    }
}

fn positive_decimal(value: Option<f64>) -> Option<Decimal> {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .and_then(Decimal::from_f64)
}
