//! Structured output of the analysis stage.
//!
//! Providers return loosely-typed JSON. Every field is optional on the wire and
//! normalised here into [`Analysis`] with explicit neutral defaults, so a
//! missing or malformed field never aborts a cycle.

use super::{Direction, Recommendation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Confidence substituted when the provider gives none or fails.
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// A named chartist pattern reported by the analyst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPattern {
    pub name: String,
    pub direction: Option<Direction>,
    /// Pattern strength (0.0 - 1.0).
    pub strength: f64,
    /// Price objective stated with the pattern, if any.
    pub target_price: Option<f64>,
}

/// Oscillator and volatility readings attached to an analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub rsi: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
    /// Position inside the Bollinger envelope, -1.0 (lower) .. 1.0 (upper).
    pub bollinger_position: Option<f64>,
    pub atr: Option<f64>,
}

/// Normalised analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub symbol: String,
    /// Confidence (0.0 - 1.0).
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub patterns: Vec<ChartPattern>,
    pub indicators: Indicators,
    pub entry_price: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    /// Risk-reward the analyst assigned to its own recommendation.
    pub risk_reward: Option<f64>,
    pub reasoning: String,
    /// Set when contradiction resolution replaced or confirmed the
    /// recommendation after scoring several candidates.
    #[serde(default)]
    pub resolved_contradiction: bool,
    /// Set when the provider failed and this is the neutral fallback.
    #[serde(default)]
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

impl Analysis {
    /// Neutral fallback: confidence 0.5, hold, no patterns.
    pub fn neutral(symbol: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            confidence: NEUTRAL_CONFIDENCE,
            recommendation: Recommendation::Hold,
            patterns: Vec::new(),
            indicators: Indicators::default(),
            entry_price: None,
            support: None,
            resistance: None,
            risk_reward: None,
            reasoning: String::new(),
            resolved_contradiction: false,
            degraded: true,
            created_at: Utc::now(),
        }
    }

    /// Decode a provider payload, falling back to [`Analysis::neutral`] if the
    /// payload is not an object at all.
    pub fn from_value_lenient(symbol: &str, value: Value) -> Self {
        match serde_json::from_value::<AnalysisPayload>(value) {
            Ok(payload) => payload.normalize(symbol),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Malformed analysis payload, using neutral default");
                Self::neutral(symbol)
            }
        }
    }

    /// Strongest directional pattern at or above `min_strength`.
    pub fn dominant_pattern(&self, min_strength: f64) -> Option<&ChartPattern> {
        self.patterns
            .iter()
            .filter(|p| p.direction.is_some() && p.strength >= min_strength)
            .max_by(|a, b| a.strength.total_cmp(&b.strength))
    }
}

/// Wire shape of an analysis payload. Everything is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalysisPayload {
    confidence: Option<Value>,
    recommendation: Option<String>,
    #[serde(alias = "chartist_patterns")]
    patterns: Vec<Value>,
    rsi: Option<f64>,
    macd_signal: Option<f64>,
    macd_histogram: Option<f64>,
    stochastic_k: Option<f64>,
    stochastic_d: Option<f64>,
    #[serde(alias = "bb_position")]
    bollinger_position: Option<f64>,
    atr: Option<f64>,
    entry_price: Option<f64>,
    support: Option<f64>,
    resistance: Option<f64>,
    risk_reward: Option<f64>,
    reasoning: Option<String>,
}

impl AnalysisPayload {
    fn normalize(self, symbol: &str) -> Analysis {
        let confidence = self
            .confidence
            .as_ref()
            .and_then(number_from_value)
            .map(|c| if c > 1.0 { c / 100.0 } else { c })
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(NEUTRAL_CONFIDENCE);

        Analysis {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            confidence,
            recommendation: self
                .recommendation
                .as_deref()
                .map(Recommendation::parse_lenient)
                .unwrap_or_default(),
            patterns: self.patterns.iter().filter_map(pattern_from_value).collect(),
            indicators: Indicators {
                rsi: finite(self.rsi),
                macd_signal: finite(self.macd_signal),
                macd_histogram: finite(self.macd_histogram),
                stochastic_k: finite(self.stochastic_k),
                stochastic_d: finite(self.stochastic_d),
                bollinger_position: finite(self.bollinger_position),
                atr: finite(self.atr).filter(|v| *v > 0.0),
            },
            entry_price: finite(self.entry_price).filter(|v| *v > 0.0),
            support: finite(self.support).filter(|v| *v > 0.0),
            resistance: finite(self.resistance).filter(|v| *v > 0.0),
            risk_reward: finite(self.risk_reward),
            reasoning: self.reasoning.unwrap_or_default(),
            resolved_contradiction: false,
            degraded: false,
            created_at: Utc::now(),
        }
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Numbers sometimes arrive as strings ("0.82", "82%").
pub(crate) fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

/// Patterns arrive either as bare names or as objects.
fn pattern_from_value(value: &Value) -> Option<ChartPattern> {
    match value {
        Value::String(name) if !name.is_empty() => Some(ChartPattern {
            name: name.clone(),
            direction: None,
            strength: 0.0,
            target_price: None,
        }),
        Value::Object(map) => {
            let name = map.get("name").and_then(Value::as_str)?.to_string();
            let direction = map
                .get("direction")
                .and_then(Value::as_str)
                .and_then(|d| Recommendation::parse_lenient(d).direction());
            let strength = map
                .get("strength")
                .and_then(number_from_value)
                .filter(|s| s.is_finite())
                .map(|s| s.clamp(0.0, 1.0))
                .unwrap_or(0.0);
            let target_price = map
                .get("target_price")
                .and_then(number_from_value)
                .filter(|t| t.is_finite() && *t > 0.0);
            Some(ChartPattern {
                name,
                direction,
                strength,
                target_price,
            })
        }
        _ => None,
    }
}
