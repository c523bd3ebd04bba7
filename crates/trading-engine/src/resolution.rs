//! Contradiction resolution.
//!
//! When the primary recommendation disagrees with the auxiliary signals
//! (chart pattern, RSI/MACD, Bollinger position), every viable direction is
//! scored by risk-reward and the strictly best one wins. Ties keep the
//! primary recommendation. Resolution is best-effort: on any internal failure
//! the caller keeps the original recommendation.

use pipeline_core::config::ResolutionConfig;
use pipeline_core::types::{
    Analysis, ChartPattern, Decision, Direction, Indicators, Recommendation,
};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Ratios closer than this are a tie.
const RATIO_EPSILON: f64 = 1e-9;

/// Errors raised while scoring candidates.
#[derive(Debug, Error, PartialEq)]
pub enum ResolutionError {
    #[error("no entry price available")]
    MissingEntryPrice,

    #[error("invalid entry price {0}")]
    InvalidEntryPrice(f64),

    #[error("non-finite risk-reward for {0} candidate")]
    NonFinite(CandidateOption),
}

/// Directional hypothesis considered during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOption {
    Hold,
    Long,
    Short,
}

impl CandidateOption {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateOption::Hold => "hold",
            CandidateOption::Long => "long",
            CandidateOption::Short => "short",
        }
    }

    pub fn recommendation(self) -> Recommendation {
        match self {
            CandidateOption::Hold => Recommendation::Hold,
            CandidateOption::Long => Recommendation::Long,
            CandidateOption::Short => Recommendation::Short,
        }
    }
}

impl From<Direction> for CandidateOption {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => CandidateOption::Long,
            Direction::Short => CandidateOption::Short,
        }
    }
}

impl fmt::Display for CandidateOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored candidate. Transient, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub option: CandidateOption,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub risk: f64,
    pub reward: f64,
    pub ratio: f64,
    pub rationale: String,
}

/// Kind of disagreement that triggered resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Contradiction {
    /// Primary says hold while a pattern points somewhere.
    HoldVersusPattern { pattern_direction: Direction },
    /// RSI is extreme while MACD shows a non-trivial reading.
    MomentumExtreme {
        rsi: f64,
        lean: Direction,
        macd_confirms: bool,
    },
    /// Price is at a Bollinger extreme while MACD points the other way.
    BandDivergence {
        bollinger_position: f64,
        macd_histogram: f64,
    },
}

/// Auxiliary inputs to resolution, extracted from an analysis.
#[derive(Debug, Clone, Default)]
pub struct AuxiliarySignals {
    pub entry_price: Option<f64>,
    pub pattern: Option<ChartPattern>,
    pub indicators: Indicators,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

impl AuxiliarySignals {
    /// Uses the analysis entry price, or `reference_price` when it has none.
    pub fn from_analysis(analysis: &Analysis, reference_price: f64) -> Self {
        Self {
            entry_price: analysis.entry_price.or(Some(reference_price)),
            pattern: analysis.dominant_pattern(0.0).cloned(),
            indicators: analysis.indicators.clone(),
            support: analysis.support,
            resistance: analysis.resistance,
        }
    }
}

/// Outcome of a resolution pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub primary: Recommendation,
    pub recommendation: Recommendation,
    pub contradiction: Option<Contradiction>,
    pub candidates: Vec<Candidate>,
    /// Unique best option, `None` on a tie or when no scoring happened.
    pub winner: Option<CandidateOption>,
    /// True when candidates were scored.
    pub applied: bool,
    pub rationale: String,
}

impl Resolution {
    fn passthrough(primary: Recommendation, rationale: impl Into<String>) -> Self {
        Self {
            primary,
            recommendation: primary,
            contradiction: None,
            candidates: Vec::new(),
            winner: None,
            applied: false,
            rationale: rationale.into(),
        }
    }

    /// Whether the final recommendation differs from the primary one.
    pub fn changed(&self) -> bool {
        self.recommendation != self.primary
    }

    /// Best candidate for the winning option.
    pub fn winning_candidate(&self) -> Option<&Candidate> {
        let winner = self.winner?;
        self.candidates
            .iter()
            .filter(|c| c.option == winner)
            .max_by(|a, b| a.ratio.total_cmp(&b.ratio))
    }
}

/// Scores disagreeing signals and picks the best direction.
#[derive(Debug, Clone, Default)]
pub struct ContradictionResolver {
    config: ResolutionConfig,
}

impl ContradictionResolver {
    pub fn new(config: ResolutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// First matching contradiction, checked in order: hold versus pattern,
    /// momentum extreme, band divergence.
    pub fn detect(&self, primary: Recommendation, signals: &AuxiliarySignals) -> Option<Contradiction> {
        if primary.is_hold() {
            if let Some(direction) = signals.pattern.as_ref().and_then(|p| p.direction) {
                return Some(Contradiction::HoldVersusPattern {
                    pattern_direction: direction,
                });
            }
        }

        let indicators = &signals.indicators;
        let histogram = indicators.macd_histogram.filter(|h| h.is_finite());

        if let (Some(rsi), Some(h)) = (indicators.rsi.filter(|r| r.is_finite()), histogram) {
            let lean = if rsi < self.config.rsi_oversold {
                Some(Direction::Long)
            } else if rsi > self.config.rsi_overbought {
                Some(Direction::Short)
            } else {
                None
            };
            if let Some(lean) = lean {
                if h.abs() > self.config.macd_min_magnitude {
                    return Some(Contradiction::MomentumExtreme {
                        rsi,
                        lean,
                        macd_confirms: h.signum() == lean.sign_f64(),
                    });
                }
            }
        }

        if let (Some(bb), Some(h)) = (
            indicators.bollinger_position.filter(|b| b.is_finite()),
            histogram,
        ) {
            if bb.abs() > self.config.bollinger_extreme && bb * h < 0.0 {
                return Some(Contradiction::BandDivergence {
                    bollinger_position: bb,
                    macd_histogram: h,
                });
            }
        }

        None
    }

    /// Detect and, if needed, score candidates.
    pub fn resolve(
        &self,
        primary: Recommendation,
        signals: &AuxiliarySignals,
    ) -> Result<Resolution, ResolutionError> {
        let Some(contradiction) = self.detect(primary, signals) else {
            return Ok(Resolution::passthrough(primary, "no contradiction detected"));
        };

        let entry = signals.entry_price.ok_or(ResolutionError::MissingEntryPrice)?;
        if !entry.is_finite() || entry <= 0.0 {
            return Err(ResolutionError::InvalidEntryPrice(entry));
        }

        let atr = signals
            .indicators
            .atr
            .filter(|a| a.is_finite() && *a > 0.0)
            .unwrap_or(entry * self.config.default_atr_pct / 100.0);

        let mut candidates = vec![self.hold_candidate(entry, atr, signals)];
        if let Some(pattern) = signals.pattern.as_ref() {
            if let Some(direction) = pattern.direction {
                candidates.push(self.pattern_candidate(entry, atr, direction, pattern));
            }
        }
        if let Some(direction) = self.technical_direction(&signals.indicators) {
            candidates.push(self.technical_candidate(entry, atr, direction, signals));
        }

        if let Some(bad) = candidates.iter().find(|c| !c.ratio.is_finite()) {
            return Err(ResolutionError::NonFinite(bad.option));
        }

        let best = candidates
            .iter()
            .map(|c| c.ratio)
            .fold(f64::NEG_INFINITY, f64::max);
        let top: Vec<CandidateOption> = candidates
            .iter()
            .filter(|c| (c.ratio - best).abs() <= RATIO_EPSILON)
            .map(|c| c.option)
            .collect();
        let winner = match top.split_first() {
            Some((first, rest)) if rest.iter().all(|o| o == first) => Some(*first),
            _ => None,
        };

        let recommendation = winner.map(CandidateOption::recommendation).unwrap_or(primary);
        let breakdown = candidates
            .iter()
            .map(|c| format!("{} {:.2}", c.option, c.ratio))
            .collect::<Vec<_>>()
            .join(" | ");
        let rationale = match winner {
            Some(option) => format!("risk-reward resolution: {} wins ({})", option, breakdown),
            None => format!("risk-reward resolution: tie, keeping {} ({})", primary.as_str(), breakdown),
        };

        debug!(
            primary = primary.as_str(),
            result = recommendation.as_str(),
            contradiction = ?contradiction,
            best_ratio = best,
            "Contradiction resolved"
        );

        Ok(Resolution {
            primary,
            recommendation,
            contradiction: Some(contradiction),
            candidates,
            winner,
            applied: true,
            rationale,
        })
    }

    /// [`resolve`](Self::resolve), keeping the primary recommendation on error.
    pub fn resolve_or_keep(&self, primary: Recommendation, signals: &AuxiliarySignals) -> Resolution {
        match self.resolve(primary, signals) {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(error = %e, primary = primary.as_str(), "Resolution failed, keeping original recommendation");
                Resolution::passthrough(primary, format!("resolution failed: {}", e))
            }
        }
    }

    /// Resolve an analysis in place. Marks `resolved_contradiction` when
    /// candidates were scored.
    pub fn apply_to_analysis(&self, analysis: &mut Analysis, reference_price: f64) -> Resolution {
        let signals = AuxiliarySignals::from_analysis(analysis, reference_price);
        let resolution = self.resolve_or_keep(analysis.recommendation, &signals);

        if resolution.applied {
            analysis.resolved_contradiction = true;
            analysis.recommendation = resolution.recommendation;
            if let Some(candidate) = resolution.winning_candidate() {
                analysis.risk_reward = Some(candidate.ratio);
            }
            append_reasoning(&mut analysis.reasoning, &resolution.rationale);
        }
        resolution
    }

    /// Resolve a decision against the auxiliary signals of its analysis.
    ///
    /// A changed direction also replaces the stop, target and risk-reward with
    /// the winning candidate's.
    pub fn apply_to_decision(
        &self,
        decision: &mut Decision,
        analysis: &Analysis,
        reference_price: f64,
    ) -> Resolution {
        let mut signals = AuxiliarySignals::from_analysis(analysis, reference_price);
        if let Some(entry) = decision.entry_price.and_then(|p| p.to_f64()) {
            signals.entry_price = Some(entry);
        }

        let resolution = self.resolve_or_keep(decision.signal, &signals);
        if !resolution.applied {
            return resolution;
        }

        decision.resolution_applied = true;
        if resolution.changed() {
            info!(
                symbol = %decision.symbol,
                from = resolution.primary.as_str(),
                to = resolution.recommendation.as_str(),
                "Decision direction changed by resolution"
            );
            decision.signal = resolution.recommendation;
            if let Some(candidate) = resolution.winning_candidate() {
                if candidate.option != CandidateOption::Hold {
                    decision.stop_loss = Decimal::from_f64(candidate.stop).map(|d| d.round_dp(8));
                    decision.take_profits = Decimal::from_f64(candidate.target)
                        .map(|d| vec![d.round_dp(8)])
                        .unwrap_or_default();
                    decision.risk_reward = Some(candidate.ratio);
                }
            }
        }
        append_reasoning(&mut decision.reasoning, &resolution.rationale);
        resolution
    }

    fn hold_candidate(&self, entry: f64, atr: f64, signals: &AuxiliarySignals) -> Candidate {
        let (support, resistance) = self.bands(entry, atr, signals);
        let to_support = entry - support;
        let to_resistance = resistance - entry;

        let (risk, opposite, stop) = if to_support <= to_resistance {
            (to_support, to_resistance, support)
        } else {
            (to_resistance, to_support, resistance)
        };
        let reward = opposite * self.config.hold_reward_fraction;
        let target = if stop < entry { entry + reward } else { entry - reward };
        let ratio = (reward / risk).min(self.config.hold_max_rr);

        Candidate {
            option: CandidateOption::Hold,
            entry,
            stop,
            target,
            risk,
            reward,
            ratio,
            rationale: format!(
                "range {:.4}-{:.4}, nearest band {:.4} away",
                support, resistance, risk
            ),
        }
    }

    fn pattern_candidate(
        &self,
        entry: f64,
        atr: f64,
        direction: Direction,
        pattern: &ChartPattern,
    ) -> Candidate {
        let sign = direction.sign_f64();
        let multiplier = (self.config.pattern_stop_atr - pattern.strength.clamp(0.0, 1.0)).max(1.0);
        let risk = atr * multiplier;
        let stop = entry - sign * risk;

        let target = pattern
            .target_price
            .filter(|t| t.is_finite() && sign * (t - entry) > 0.0)
            .unwrap_or(entry + sign * self.config.extension_atr * atr);
        let reward = sign * (target - entry);
        let ratio = (reward / risk).min(self.config.pattern_max_rr);

        Candidate {
            option: direction.into(),
            entry,
            stop,
            target,
            risk,
            reward,
            ratio,
            rationale: format!(
                "pattern {} (strength {:.2}), stop {:.2} ATR",
                pattern.name, pattern.strength, multiplier
            ),
        }
    }

    fn technical_candidate(
        &self,
        entry: f64,
        atr: f64,
        direction: Direction,
        signals: &AuxiliarySignals,
    ) -> Candidate {
        let sign = direction.sign_f64();
        let strength = self.signal_strength(&signals.indicators, direction);
        let risk = self.config.technical_stop_atr * atr;
        let stop = entry - sign * risk;

        let band = match direction {
            Direction::Long => signals.resistance.filter(|r| r.is_finite() && *r > entry),
            Direction::Short => signals.support.filter(|s| s.is_finite() && *s < entry && *s > 0.0),
        };
        let target = band.unwrap_or(entry + sign * self.config.extension_atr * atr);
        let reward = sign * (target - entry);
        let ratio = (reward / risk * strength).min(self.config.technical_max_rr);

        Candidate {
            option: direction.into(),
            entry,
            stop,
            target,
            risk,
            reward,
            ratio,
            rationale: format!("technical {} signal, strength {:.2}", direction, strength),
        }
    }

    /// RSI first, then Bollinger position.
    fn technical_direction(&self, indicators: &Indicators) -> Option<Direction> {
        if let Some(rsi) = indicators.rsi.filter(|r| r.is_finite()) {
            if rsi < self.config.rsi_oversold {
                return Some(Direction::Long);
            }
            if rsi > self.config.rsi_overbought {
                return Some(Direction::Short);
            }
        }
        let bb = indicators.bollinger_position.filter(|b| b.is_finite())?;
        if bb < -self.config.bollinger_extreme {
            Some(Direction::Long)
        } else if bb > self.config.bollinger_extreme {
            Some(Direction::Short)
        } else {
            None
        }
    }

    /// How far RSI, Bollinger and MACD lean towards `direction`, in
    /// `[0, max_signal_strength]`.
    pub fn signal_strength(&self, indicators: &Indicators, direction: Direction) -> f64 {
        let sign = direction.sign_f64();

        let rsi_lean = indicators
            .rsi
            .filter(|r| r.is_finite())
            .map(|rsi| (sign * (50.0 - rsi) / 40.0).clamp(0.0, 0.5))
            .unwrap_or(0.0);
        let bb_lean = indicators
            .bollinger_position
            .filter(|b| b.is_finite())
            .map(|bb| (-sign * bb / 2.0).clamp(0.0, 0.5))
            .unwrap_or(0.0);
        let macd_lean = match indicators.macd_histogram {
            Some(h) if h.is_finite() && h.abs() > self.config.macd_min_magnitude && h.signum() == sign => 0.5,
            _ => 0.0,
        };

        (rsi_lean + bb_lean + macd_lean).clamp(0.0, self.config.max_signal_strength)
    }

    fn bands(&self, entry: f64, atr: f64, signals: &AuxiliarySignals) -> (f64, f64) {
        let offset = self.config.default_band_atr * atr;
        let support = signals
            .support
            .filter(|s| s.is_finite() && *s < entry && *s > 0.0)
            .unwrap_or(entry - offset);
        let resistance = signals
            .resistance
            .filter(|r| r.is_finite() && *r > entry)
            .unwrap_or(entry + offset);
        (support, resistance)
    }
}

fn append_reasoning(reasoning: &mut String, note: &str) {
    if !reasoning.is_empty() {
        reasoning.push_str(" | ");
    }
    reasoning.push_str(note);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(direction: Direction, strength: f64, target: Option<f64>) -> ChartPattern {
        ChartPattern {
            name: "ascending_triangle".to_string(),
            direction: Some(direction),
            strength,
            target_price: target,
        }
    }

    fn signals_with_pattern(p: ChartPattern) -> AuxiliarySignals {
        AuxiliarySignals {
            entry_price: Some(100.0),
            pattern: Some(p),
            indicators: Indicators {
                atr: Some(2.5),
                ..Default::default()
            },
            support: None,
            resistance: None,
        }
    }

    #[test]
    fn test_no_contradiction_passes_through() {
        let resolver = ContradictionResolver::default();
        let signals = AuxiliarySignals {
            entry_price: Some(100.0),
            indicators: Indicators {
                rsi: Some(55.0),
                macd_histogram: Some(0.01),
                bollinger_position: Some(0.2),
                ..Default::default()
            },
            ..Default::default()
        };

        let resolution = resolver.resolve(Recommendation::Long, &signals).unwrap();
        assert!(!resolution.applied);
        assert!(!resolution.changed());
        assert_eq!(resolution.recommendation, Recommendation::Long);
        assert!(resolution.candidates.is_empty());
    }

    #[test]
    fn test_hold_versus_long_pattern_is_deterministic() {
        let resolver = ContradictionResolver::default();
        // ATR 2.5 with strength 0.8 puts the stop at 97.
        let signals = signals_with_pattern(pattern(Direction::Long, 0.8, None));

        let first = resolver.resolve(Recommendation::Hold, &signals).unwrap();
        for _ in 0..5 {
            let again = resolver.resolve(Recommendation::Hold, &signals).unwrap();
            assert_eq!(again.winner, first.winner);
            assert_eq!(again.candidates, first.candidates);
        }

        assert_eq!(
            first.contradiction,
            Some(Contradiction::HoldVersusPattern {
                pattern_direction: Direction::Long
            })
        );
        assert_eq!(first.winner, Some(CandidateOption::Long));
        assert_eq!(first.recommendation, Recommendation::Long);

        let long = first.winning_candidate().unwrap();
        assert!((long.stop - 97.0).abs() < 1e-9);
        assert!((long.target - 107.5).abs() < 1e-9);
        assert!((long.ratio - 2.5).abs() < 1e-9);

        let hold = first
            .candidates
            .iter()
            .find(|c| c.option == CandidateOption::Hold)
            .unwrap();
        assert!((hold.ratio - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_ratios_are_capped() {
        let resolver = ContradictionResolver::default();
        // Far pattern target would give 30:1 uncapped.
        let signals = signals_with_pattern(pattern(Direction::Long, 0.8, Some(190.0)));
        let resolution = resolver.resolve(Recommendation::Hold, &signals).unwrap();
        let long = resolution.winning_candidate().unwrap();
        assert_eq!(long.ratio, 5.0);
    }

    #[test]
    fn test_tie_keeps_primary() {
        let resolver = ContradictionResolver::default();
        let mut signals = signals_with_pattern(pattern(Direction::Long, 0.8, Some(109.0)));
        // Hold: nearest band 1 away, reward 0.6 * 10 = 6, capped at 3.
        signals.support = Some(99.0);
        signals.resistance = Some(110.0);

        let resolution = resolver.resolve(Recommendation::Hold, &signals).unwrap();
        assert!(resolution.applied);
        assert_eq!(resolution.winner, None);
        assert_eq!(resolution.recommendation, Recommendation::Hold);
        assert!(resolution.rationale.contains("tie"));
    }

    #[test]
    fn test_momentum_extreme_adds_technical_candidate() {
        let resolver = ContradictionResolver::default();
        let signals = AuxiliarySignals {
            entry_price: Some(100.0),
            indicators: Indicators {
                rsi: Some(25.0),
                macd_histogram: Some(0.002),
                bollinger_position: Some(-0.9),
                atr: Some(2.0),
                ..Default::default()
            },
            resistance: Some(106.0),
            ..Default::default()
        };

        let resolution = resolver.resolve(Recommendation::Short, &signals).unwrap();
        assert_eq!(
            resolution.contradiction,
            Some(Contradiction::MomentumExtreme {
                rsi: 25.0,
                lean: Direction::Long,
                macd_confirms: true,
            })
        );

        // rsi 0.5 (capped) + bb 0.45 + macd 0.5
        let strength = resolver.signal_strength(&signals.indicators, Direction::Long);
        assert!((strength - 1.45).abs() < 1e-9);

        let technical = resolution
            .candidates
            .iter()
            .find(|c| c.option == CandidateOption::Long)
            .unwrap();
        // risk 3, reward 6, base 2.0 * 1.45
        assert!((technical.ratio - 2.9).abs() < 1e-9);
        assert_eq!(resolution.recommendation, Recommendation::Long);
    }

    #[test]
    fn test_band_divergence_detected() {
        let resolver = ContradictionResolver::default();
        let signals = AuxiliarySignals {
            entry_price: Some(50.0),
            indicators: Indicators {
                rsi: Some(50.0),
                macd_histogram: Some(-0.001),
                bollinger_position: Some(0.9),
                ..Default::default()
            },
            ..Default::default()
        };

        let contradiction = resolver.detect(Recommendation::Long, &signals);
        assert!(matches!(contradiction, Some(Contradiction::BandDivergence { .. })));

        let strength = resolver.signal_strength(&signals.indicators, Direction::Short);
        assert!((strength - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_small_macd_is_not_a_contradiction() {
        let resolver = ContradictionResolver::default();
        let signals = AuxiliarySignals {
            entry_price: Some(100.0),
            indicators: Indicators {
                rsi: Some(75.0),
                macd_histogram: Some(0.00005),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(resolver.detect(Recommendation::Long, &signals).is_none());
    }

    #[test]
    fn test_failure_keeps_original() {
        let resolver = ContradictionResolver::default();
        let mut signals = signals_with_pattern(pattern(Direction::Short, 0.9, None));
        signals.entry_price = Some(f64::NAN);

        assert!(matches!(
            resolver.resolve(Recommendation::Hold, &signals),
            Err(ResolutionError::InvalidEntryPrice(_))
        ));

        let kept = resolver.resolve_or_keep(Recommendation::Hold, &signals);
        assert!(!kept.applied);
        assert_eq!(kept.recommendation, Recommendation::Hold);

        signals.entry_price = None;
        assert_eq!(
            resolver.resolve(Recommendation::Hold, &signals).unwrap_err(),
            ResolutionError::MissingEntryPrice
        );
    }

    #[test]
    fn test_apply_to_decision_flips_direction() {
        let resolver = ContradictionResolver::default();
        let mut analysis = Analysis::neutral("ETHUSDT");
        analysis.degraded = false;
        analysis.patterns = vec![pattern(Direction::Long, 0.8, None)];
        analysis.indicators.atr = Some(2.5);

        let mut decision = Decision::neutral("ETHUSDT");
        decision.entry_price = Some(Decimal::new(100, 0));

        let resolution = resolver.apply_to_decision(&mut decision, &analysis, 100.0);
        assert!(resolution.applied);
        assert!(decision.resolution_applied);
        assert_eq!(decision.signal, Recommendation::Long);
        assert_eq!(decision.stop_loss, Some(Decimal::new(97, 0)));
        assert_eq!(decision.take_profits, vec![Decimal::new(1075, 1)]);
    }

    #[test]
    fn test_apply_to_analysis_sets_flag() {
        let resolver = ContradictionResolver::default();
        let mut analysis = Analysis::neutral("SOLUSDT");
        analysis.patterns = vec![pattern(Direction::Short, 0.8, None)];
        analysis.indicators.atr = Some(2.5);

        resolver.apply_to_analysis(&mut analysis, 100.0);
        assert!(analysis.resolved_contradiction);
        assert_eq!(analysis.recommendation, Recommendation::Short);
        assert!(analysis.reasoning.contains("short wins"));
    }
}
