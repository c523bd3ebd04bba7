//! Adaptive take-profit targets.
//!
//! A position's momentum and volume are classified into a regime on every
//! observation. On a regime change the entry-relative gain of tp2..tp4 is
//! rescaled from the initial ladder; tp1 never moves.

use crate::RiskError;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pipeline_core::config::RiskConfig;
use pipeline_core::types::{Direction, TpLadder, TpTier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Market regime of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Bull,
    Bear,
    Neutral,
}

impl Regime {
    pub fn as_str(self) -> &'static str {
        match self {
            Regime::Bull => "BULL",
            Regime::Bear => "BEAR",
            Regime::Neutral => "NEUTRAL",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four-tier target ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLadder {
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub tp3: Decimal,
    pub tp4: Decimal,
}

impl TargetLadder {
    /// First four tiers of a standard ladder.
    pub fn from_tp_ladder(ladder: &TpLadder) -> Self {
        Self {
            tp1: ladder.price(TpTier::Tp1),
            tp2: ladder.price(TpTier::Tp2),
            tp3: ladder.price(TpTier::Tp3),
            tp4: ladder.price(TpTier::Tp4),
        }
    }

    /// Ladder from a provider proposal: the first four levels, each strictly
    /// further from `entry` in the trade's direction. `None` when fewer than
    /// four levels are given or they are not on the profitable side in order.
    pub fn from_proposal(entry: Decimal, direction: Direction, levels: &[Decimal]) -> Option<Self> {
        let levels = levels.get(..4)?;
        let mut previous = entry;
        for level in levels {
            let gain = (*level - previous) * direction.sign();
            if gain <= Decimal::ZERO {
                return None;
            }
            previous = *level;
        }
        Some(Self {
            tp1: levels[0],
            tp2: levels[1],
            tp3: levels[2],
            tp4: levels[3],
        })
    }

    /// Scale the entry-relative gain of tp2..tp4 by `factors`; tp1 is kept.
    pub fn rescaled(&self, entry: Decimal, factors: [Decimal; 3]) -> Self {
        let scale = |level: Decimal, factor: Decimal| entry + (level - entry) * factor;
        Self {
            tp1: self.tp1,
            tp2: scale(self.tp2, factors[0]),
            tp3: scale(self.tp3, factors[1]),
            tp4: scale(self.tp4, factors[2]),
        }
    }
}

/// One applied regime change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderAdjustment {
    pub at: DateTime<Utc>,
    pub from: Regime,
    pub to: Regime,
    pub momentum_pct: Decimal,
    pub volume: Decimal,
    pub ladder: TargetLadder,
}

/// Regime change reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeChange {
    pub position_id: Uuid,
    pub symbol: String,
    pub from: Regime,
    pub to: Regime,
    pub ladder: TargetLadder,
}

/// Adaptive take-profit state for one position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveTpRecord {
    pub id: Uuid,
    pub symbol: String,
    pub position_id: Uuid,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub initial_ladder: TargetLadder,
    pub current_ladder: TargetLadder,
    pub regime: Regime,
    pub current_price: Decimal,
    pub current_volume: Decimal,
    pub entry_volume: Decimal,
    pub tp1_hit_at: Option<DateTime<Utc>>,
    /// Percent move from entry in the position's favour.
    pub momentum_score: Decimal,
    pub volatility_score: Decimal,
    pub adjustments: Vec<LadderAdjustment>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl AdaptiveTpRecord {
    pub fn new(
        symbol: impl Into<String>,
        position_id: Uuid,
        direction: Direction,
        entry_price: Decimal,
        initial_ladder: TargetLadder,
        entry_volume: Decimal,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            position_id,
            direction,
            entry_price,
            entry_time,
            initial_ladder,
            current_ladder: initial_ladder,
            regime: Regime::Neutral,
            current_price: entry_price,
            current_volume: entry_volume,
            entry_volume,
            tp1_hit_at: None,
            momentum_score: Decimal::ZERO,
            volatility_score: Decimal::ZERO,
            adjustments: Vec::new(),
            last_evaluated_at: None,
        }
    }

    fn tp1_reached(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price >= self.initial_ladder.tp1,
            Direction::Short => price <= self.initial_ladder.tp1,
        }
    }

    fn momentum_at(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED * self.direction.sign()
    }

    /// Regime for the current observation. BULL is checked before BEAR.
    pub fn classify(&self, momentum: Decimal, volume: Decimal, now: DateTime<Utc>, config: &RiskConfig) -> Regime {
        let volatility = momentum.abs();

        let recent_tp1 = self
            .tp1_hit_at
            .is_some_and(|hit| now - hit <= Duration::minutes(config.bull_window_mins));
        let volume_up = self.entry_volume > Decimal::ZERO
            && volume >= self.entry_volume * (Decimal::ONE + config.bull_volume_gain);
        if recent_tp1 && momentum > config.bull_momentum_pct && volume_up {
            return Regime::Bull;
        }

        let stalled = self.tp1_hit_at.is_none()
            && now - self.entry_time > Duration::minutes(config.tp1_timeout_mins);
        if momentum < config.bear_momentum_pct || volatility > config.bear_volatility_pct || stalled {
            return Regime::Bear;
        }

        Regime::Neutral
    }

    /// Record an observation and reclassify. Returns whether the regime
    /// changed.
    pub fn evaluate_at(&mut self, price: Decimal, volume: Decimal, now: DateTime<Utc>, config: &RiskConfig) -> bool {
        if self.tp1_hit_at.is_none() && self.tp1_reached(price) {
            self.tp1_hit_at = Some(now);
            debug!(position_id = %self.position_id, price = %price, "TP1 reached");
        }

        let momentum = self.momentum_at(price);
        self.current_price = price;
        self.current_volume = volume;
        self.momentum_score = momentum;
        self.volatility_score = momentum.abs();
        self.last_evaluated_at = Some(now);

        let regime = self.classify(momentum, volume, now, config);
        if regime == self.regime {
            return false;
        }

        match regime {
            Regime::Bull => {
                let m = config.bull_multiplier;
                self.current_ladder = self.initial_ladder.rescaled(self.entry_price, [m, m, m]);
            }
            Regime::Bear => {
                self.current_ladder = self
                    .initial_ladder
                    .rescaled(self.entry_price, config.bear_multipliers);
            }
            Regime::Neutral => {}
        }

        self.adjustments.push(LadderAdjustment {
            at: now,
            from: self.regime,
            to: regime,
            momentum_pct: momentum,
            volume,
            ladder: self.current_ladder,
        });
        self.regime = regime;
        true
    }
}

struct TrackedTargets {
    symbol: String,
    record: Arc<Mutex<AdaptiveTpRecord>>,
}

/// Registry of adaptive take-profit records keyed by position.
pub struct AdaptiveTpManager {
    records: DashMap<Uuid, TrackedTargets>,
    config: RiskConfig,
}

impl AdaptiveTpManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }

    pub fn create(
        &self,
        symbol: &str,
        position_id: Uuid,
        direction: Direction,
        entry_price: Decimal,
        initial_ladder: TargetLadder,
        volume_at_entry: Decimal,
    ) -> Result<AdaptiveTpRecord, RiskError> {
        if entry_price <= Decimal::ZERO {
            return Err(RiskError::InvalidInput(format!("entry price {} must be positive", entry_price)));
        }
        let record = AdaptiveTpRecord::new(
            symbol,
            position_id,
            direction,
            entry_price,
            initial_ladder,
            volume_at_entry,
            Utc::now(),
        );

        match self.records.entry(position_id) {
            Entry::Occupied(_) => Err(RiskError::AlreadyActive(position_id)),
            Entry::Vacant(slot) => {
                slot.insert(TrackedTargets {
                    symbol: symbol.to_string(),
                    record: Arc::new(Mutex::new(record.clone())),
                });
                info!(
                    position_id = %position_id,
                    symbol = %symbol,
                    entry = %entry_price,
                    tp1 = %initial_ladder.tp1,
                    tp4 = %initial_ladder.tp4,
                    "Adaptive take-profit created"
                );
                Ok(record)
            }
        }
    }

    /// Evaluate one position at the current time.
    pub async fn evaluate(&self, position_id: Uuid, price: Decimal, volume: Decimal) -> Result<bool, RiskError> {
        self.evaluate_at(position_id, price, volume, Utc::now()).await
    }

    pub async fn evaluate_at(
        &self,
        position_id: Uuid,
        price: Decimal,
        volume: Decimal,
        now: DateTime<Utc>,
    ) -> Result<bool, RiskError> {
        let handle = self
            .records
            .get(&position_id)
            .map(|e| e.value().record.clone())
            .ok_or(RiskError::NotFound(position_id))?;
        let mut record = handle.lock().await;
        Ok(self.apply(&mut record, price, volume, now).is_some())
    }

    /// Feed an observation to every record for `symbol`.
    pub async fn on_price_update(
        &self,
        symbol: &str,
        price: Decimal,
        volume: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<RegimeChange> {
        let handles: Vec<_> = self
            .records
            .iter()
            .filter(|e| e.value().symbol == symbol)
            .map(|e| e.value().record.clone())
            .collect();

        let mut changes = Vec::new();
        for handle in handles {
            let mut record = handle.lock().await;
            if let Some(change) = self.apply(&mut record, price, volume, now) {
                changes.push(change);
            }
        }
        changes
    }

    fn apply(
        &self,
        record: &mut AdaptiveTpRecord,
        price: Decimal,
        volume: Decimal,
        now: DateTime<Utc>,
    ) -> Option<RegimeChange> {
        let from = record.regime;
        if !record.evaluate_at(price, volume, now, &self.config) {
            return None;
        }
        info!(
            position_id = %record.position_id,
            symbol = %record.symbol,
            from = %from,
            to = %record.regime,
            momentum = %record.momentum_score,
            tp2 = %record.current_ladder.tp2,
            tp3 = %record.current_ladder.tp3,
            tp4 = %record.current_ladder.tp4,
            "Regime changed"
        );
        Some(RegimeChange {
            position_id: record.position_id,
            symbol: record.symbol.clone(),
            from,
            to: record.regime,
            ladder: record.current_ladder,
        })
    }

    pub async fn get(&self, position_id: Uuid) -> Option<AdaptiveTpRecord> {
        let handle = self.records.get(&position_id).map(|e| e.value().record.clone())?;
        let record = handle.lock().await;
        Some(record.clone())
    }

    /// Drop the record once its position is closed.
    pub fn remove(&self, position_id: Uuid) -> bool {
        self.records.remove(&position_id).is_some()
    }

    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.records.iter().map(|e| e.value().symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
