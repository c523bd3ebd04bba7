//! Leverage-proportional trailing stops.
//!
//! Each open position gets one [`TrailingStopRecord`]. When price crosses a new
//! take-profit tier the stop is pulled to `tier ∓ tier·trail%`, clamped so it
//! never gives back the profit locked at TP1, and only ever moved in the
//! position's favour.

use crate::trailing_stop_repo::TrailingStopRepository;
use crate::RiskError;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pipeline_core::config::RiskConfig;
use pipeline_core::providers::Notifier;
use pipeline_core::types::{Direction, Notification, NotificationKind, TpLadder, TpTier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle status of a trailing stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrailingStatus {
    Active,
    Filled,
    Cancelled,
}

impl TrailingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrailingStatus::Active => "ACTIVE",
            TrailingStatus::Filled => "FILLED",
            TrailingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(TrailingStatus::Active),
            "FILLED" => Some(TrailingStatus::Filled),
            "CANCELLED" => Some(TrailingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != TrailingStatus::Active
    }
}

impl fmt::Display for TrailingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trail width in percent for a leverage:
/// `clamp(base · reference_leverage / max(leverage, min_leverage), min, max)`.
///
/// With the defaults: 2x → 6.0, 6x → 3.0, 10x → 1.8, 1x → 6.0.
pub fn trailing_percentage(leverage: Decimal, config: &RiskConfig) -> Decimal {
    let effective = leverage.max(config.min_leverage);
    (config.base_trailing_pct * config.reference_leverage / effective)
        .clamp(config.min_trailing_pct, config.max_trailing_pct)
}

/// A stop move produced by a tier crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopAdvance {
    pub position_id: Uuid,
    pub symbol: String,
    pub tier: TpTier,
    pub tier_price: Decimal,
    pub price: Decimal,
    pub previous_stop: Decimal,
    pub new_stop: Decimal,
}

impl StopAdvance {
    pub fn message(&self, direction: Direction) -> String {
        format!(
            "{} {} crossed {} at {}: stop {} -> {}",
            self.symbol, direction, self.tier, self.price, self.previous_stop, self.new_stop
        )
    }
}

/// Trailing stop state for one position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopRecord {
    pub id: Uuid,
    pub symbol: String,
    pub position_id: Uuid,
    pub direction: Direction,
    pub leverage: Decimal,
    /// Trail width in percent, within the configured bounds.
    pub trailing_percentage: Decimal,
    pub initial_stop_loss: Decimal,
    pub current_stop_loss: Decimal,
    /// Stop that TP1 locks in; generated stops never fall behind it.
    pub tp1_floor: Decimal,
    pub ladder: TpLadder,
    pub last_tp_crossed: Option<TpTier>,
    pub last_tp_price: Option<Decimal>,
    pub status: TrailingStatus,
    /// Messages sent for this position, oldest first.
    pub notifications: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrailingStopRecord {
    pub fn new(
        symbol: impl Into<String>,
        position_id: Uuid,
        leverage: Decimal,
        entry_stop: Decimal,
        ladder: TpLadder,
        config: &RiskConfig,
    ) -> Self {
        let trailing_percentage = trailing_percentage(leverage, config);
        let direction = ladder.direction;
        let tp1 = ladder.price(TpTier::Tp1);
        let tp1_floor = Self::trail_from(tp1, direction, trailing_percentage);
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            position_id,
            direction,
            leverage,
            trailing_percentage,
            initial_stop_loss: entry_stop,
            current_stop_loss: entry_stop,
            tp1_floor,
            ladder,
            last_tp_crossed: None,
            last_tp_price: None,
            status: TrailingStatus::Active,
            notifications: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `price ∓ price·pct`, minus for longs.
    fn trail_from(price: Decimal, direction: Direction, pct: Decimal) -> Decimal {
        price - direction.sign() * price * pct / Decimal::ONE_HUNDRED
    }

    fn is_improvement(&self, candidate: Decimal) -> bool {
        match self.direction {
            Direction::Long => candidate > self.current_stop_loss,
            Direction::Short => candidate < self.current_stop_loss,
        }
    }

    fn clamp_to_floor(&self, candidate: Decimal) -> Decimal {
        match self.direction {
            Direction::Long => candidate.max(self.tp1_floor),
            Direction::Short => candidate.min(self.tp1_floor),
        }
    }

    /// The stop move `price` would cause, without mutating.
    pub fn evaluate(&self, price: Decimal) -> Option<StopAdvance> {
        if self.status != TrailingStatus::Active {
            return None;
        }

        let tier = self.ladder.highest_crossed(price)?;
        if Some(tier) == self.last_tp_crossed {
            return None;
        }

        let tier_price = self.ladder.price(tier);
        let candidate = Self::trail_from(tier_price, self.direction, self.trailing_percentage);
        let candidate = self.clamp_to_floor(candidate);
        if !self.is_improvement(candidate) {
            debug!(
                position_id = %self.position_id,
                tier = %tier,
                candidate = %candidate,
                current = %self.current_stop_loss,
                "Tier crossed without improving stop"
            );
            return None;
        }

        Some(StopAdvance {
            position_id: self.position_id,
            symbol: self.symbol.clone(),
            tier,
            tier_price,
            price,
            previous_stop: self.current_stop_loss,
            new_stop: candidate,
        })
    }

    /// Evaluate and apply. Returns the advance if the stop moved.
    pub fn on_price(&mut self, price: Decimal, now: DateTime<Utc>) -> Option<StopAdvance> {
        let advance = self.evaluate(price)?;
        self.current_stop_loss = advance.new_stop;
        self.last_tp_crossed = Some(advance.tier);
        self.last_tp_price = Some(advance.tier_price);
        self.notifications.push(advance.message(self.direction));
        self.updated_at = now;
        Some(advance)
    }
}

struct TrackedStop {
    symbol: String,
    record: Arc<Mutex<TrailingStopRecord>>,
}

/// Registry of active trailing stops keyed by position.
///
/// Each record sits behind its own async mutex, so updates to one position are
/// processed in order while different positions proceed concurrently.
pub struct TrailingStopManager {
    records: DashMap<Uuid, TrackedStop>,
    config: RiskConfig,
    notifier: Arc<dyn Notifier>,
    repository: Option<Arc<TrailingStopRepository>>,
}

impl TrailingStopManager {
    pub fn new(config: RiskConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            records: DashMap::new(),
            config,
            notifier,
            repository: None,
        }
    }

    /// Persist records through `repository` in addition to memory.
    pub fn with_repository(mut self, repository: Arc<TrailingStopRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Restore active records from the repository.
    pub async fn load_active(&self) -> anyhow::Result<usize> {
        let Some(repo) = &self.repository else {
            return Ok(0);
        };
        let records = repo.get_active().await?;
        let count = records.len();
        for record in records {
            self.records.insert(
                record.position_id,
                TrackedStop {
                    symbol: record.symbol.clone(),
                    record: Arc::new(Mutex::new(record)),
                },
            );
        }
        info!(count, "Restored active trailing stops");
        Ok(count)
    }

    /// Create the trailing stop for a newly opened position.
    pub async fn create(
        &self,
        symbol: &str,
        position_id: Uuid,
        leverage: Decimal,
        entry_stop: Decimal,
        ladder: TpLadder,
    ) -> Result<TrailingStopRecord, RiskError> {
        if leverage <= Decimal::ZERO {
            return Err(RiskError::InvalidInput(format!("leverage {} must be positive", leverage)));
        }
        if entry_stop <= Decimal::ZERO {
            return Err(RiskError::InvalidInput(format!("stop {} must be positive", entry_stop)));
        }

        let record = TrailingStopRecord::new(symbol, position_id, leverage, entry_stop, ladder, &self.config);
        match self.records.entry(position_id) {
            Entry::Occupied(_) => return Err(RiskError::AlreadyActive(position_id)),
            Entry::Vacant(slot) => {
                slot.insert(TrackedStop {
                    symbol: symbol.to_string(),
                    record: Arc::new(Mutex::new(record.clone())),
                });
            }
        }

        info!(
            position_id = %position_id,
            symbol = %symbol,
            direction = %record.direction,
            leverage = %leverage,
            trailing_pct = %record.trailing_percentage,
            stop = %entry_stop,
            tp1_floor = %record.tp1_floor,
            "Trailing stop created"
        );

        if let Some(repo) = &self.repository {
            if let Err(e) = repo.insert(&record).await {
                warn!(position_id = %position_id, error = %e, "Failed to persist trailing stop");
            }
        }
        Ok(record)
    }

    fn handles_for_symbol(&self, symbol: &str) -> Vec<Arc<Mutex<TrailingStopRecord>>> {
        self.records
            .iter()
            .filter(|e| e.value().symbol == symbol)
            .map(|e| e.value().record.clone())
            .collect()
    }

    /// Feed a price to every active record for `symbol`.
    pub async fn on_price_update(&self, symbol: &str, price: Decimal) -> Vec<StopAdvance> {
        let mut advances = Vec::new();

        for handle in self.handles_for_symbol(symbol) {
            let mut record = handle.lock().await;
            let Some(advance) = record.on_price(price, Utc::now()) else {
                continue;
            };

            info!(
                position_id = %advance.position_id,
                symbol = %symbol,
                tier = %advance.tier,
                previous_stop = %advance.previous_stop,
                new_stop = %advance.new_stop,
                "Trailing stop advanced"
            );

            if let Some(repo) = &self.repository {
                if let Err(e) = repo.update(&record).await {
                    warn!(position_id = %record.position_id, error = %e, "Failed to persist stop advance");
                }
            }

            let notification = Notification::new(
                NotificationKind::StopAdvanced,
                symbol,
                record.position_id,
                advance.message(record.direction),
            );
            drop(record);
            self.dispatch(notification);
            advances.push(advance);
        }

        advances
    }

    /// Fire-and-forget delivery.
    fn dispatch(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notification).await {
                warn!(position_id = %notification.position_id, error = %e, "Notification delivery failed");
            }
        });
    }

    /// Mark a record FILLED or CANCELLED and drop it from the active set.
    pub async fn close(&self, position_id: Uuid, status: TrailingStatus) -> Result<TrailingStopRecord, RiskError> {
        if !status.is_terminal() {
            return Err(RiskError::NotTerminal(status.to_string()));
        }
        let (_, tracked) = self
            .records
            .remove(&position_id)
            .ok_or(RiskError::NotFound(position_id))?;

        let mut record = tracked.record.lock().await;
        record.status = status;
        record.updated_at = Utc::now();
        info!(position_id = %position_id, status = %status, "Trailing stop closed");

        if let Some(repo) = &self.repository {
            if let Err(e) = repo.update(&record).await {
                warn!(position_id = %position_id, error = %e, "Failed to persist trailing stop close");
            }
        }
        Ok(record.clone())
    }

    pub async fn cancel(&self, position_id: Uuid) -> Result<TrailingStopRecord, RiskError> {
        self.close(position_id, TrailingStatus::Cancelled).await
    }

    pub async fn get(&self, position_id: Uuid) -> Option<TrailingStopRecord> {
        let handle = self.records.get(&position_id).map(|e| e.value().record.clone())?;
        let record = handle.lock().await;
        Some(record.clone())
    }

    pub async fn for_symbol(&self, symbol: &str) -> Vec<TrailingStopRecord> {
        let mut records = Vec::new();
        for handle in self.handles_for_symbol(symbol) {
            records.push(handle.lock().await.clone());
        }
        records
    }

    pub async fn all(&self) -> Vec<TrailingStopRecord> {
        let handles: Vec<_> = self.records.iter().map(|e| e.value().record.clone()).collect();
        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            records.push(handle.lock().await.clone());
        }
        records
    }

    /// Distinct symbols with an active record.
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
