//! Database repository for trailing stop records.

use anyhow::{anyhow, Result};
use pipeline_core::types::{Direction, TpLadder, TpTier};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::trailing_stop::{TrailingStatus, TrailingStopRecord};

/// Repository for trailing stop persistence.
pub struct TrailingStopRepository {
    pool: PgPool,
}

impl TrailingStopRepository {
    /// Create a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new trailing stop record.
    pub async fn insert(&self, record: &TrailingStopRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trailing_stops (
                id, symbol, position_id, direction, leverage, trailing_percentage,
                initial_stop_loss, current_stop_loss, tp1_floor, reference_price,
                last_tp_crossed, last_tp_price, status, notifications,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id)
        .bind(&record.symbol)
        .bind(record.position_id)
        .bind(record.direction.as_str())
        .bind(record.leverage)
        .bind(record.trailing_percentage)
        .bind(record.initial_stop_loss)
        .bind(record.current_stop_loss)
        .bind(record.tp1_floor)
        .bind(record.ladder.reference_price)
        .bind(TpTier::label(record.last_tp_crossed))
        .bind(record.last_tp_price)
        .bind(record.status.as_str())
        .bind(serde_json::to_value(&record.notifications)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(record_id = %record.id, position_id = %record.position_id, "Inserted trailing stop");
        Ok(())
    }

    /// Update the mutable columns of a record.
    pub async fn update(&self, record: &TrailingStopRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trailing_stops SET
                current_stop_loss = $2,
                last_tp_crossed = $3,
                last_tp_price = $4,
                status = $5,
                notifications = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.current_stop_loss)
        .bind(TpTier::label(record.last_tp_crossed))
        .bind(record.last_tp_price)
        .bind(record.status.as_str())
        .bind(serde_json::to_value(&record.notifications)?)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(record_id = %record.id, stop = %record.current_stop_loss, "Updated trailing stop");
        Ok(())
    }

    /// All ACTIVE records.
    pub async fn get_active(&self) -> Result<Vec<TrailingStopRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, symbol, position_id, direction, leverage, trailing_percentage,
                initial_stop_loss, current_stop_loss, tp1_floor, reference_price,
                last_tp_crossed, last_tp_price, status, notifications,
                created_at, updated_at
            FROM trailing_stops
            WHERE status = 'ACTIVE'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        info!(count = rows.len(), "Loaded active trailing stops from database");
        rows.iter().map(Self::row_to_record).collect()
    }

    /// Most recent record for a position, any status.
    pub async fn get_by_position(&self, position_id: Uuid) -> Result<Option<TrailingStopRecord>> {
        let row = sqlx::query(
            r#"
            SELECT
                id, symbol, position_id, direction, leverage, trailing_percentage,
                initial_stop_loss, current_stop_loss, tp1_floor, reference_price,
                last_tp_crossed, last_tp_price, status, notifications,
                created_at, updated_at
            FROM trailing_stops
            WHERE position_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    /// Convert database row to a record. The ladder is rebuilt from the
    /// reference price.
    fn row_to_record(r: &sqlx::postgres::PgRow) -> Result<TrailingStopRecord> {
        let direction: String = r.get("direction");
        let direction = Direction::from_db(&direction)
            .ok_or_else(|| anyhow!("unknown direction {}", direction))?;
        let status: String = r.get("status");
        let status = TrailingStatus::from_db(&status).ok_or_else(|| anyhow!("unknown status {}", status))?;
        let last_tp: String = r.get("last_tp_crossed");
        let reference_price: Decimal = r.get("reference_price");
        let notifications: serde_json::Value = r.get("notifications");

        Ok(TrailingStopRecord {
            id: r.get("id"),
            symbol: r.get("symbol"),
            position_id: r.get("position_id"),
            direction,
            leverage: r.get("leverage"),
            trailing_percentage: r.get("trailing_percentage"),
            initial_stop_loss: r.get("initial_stop_loss"),
            current_stop_loss: r.get("current_stop_loss"),
            tp1_floor: r.get("tp1_floor"),
            ladder: TpLadder::from_reference(reference_price, direction),
            last_tp_crossed: TpTier::from_label(&last_tp),
            last_tp_price: r.get("last_tp_price"),
            status,
            notifications: serde_json::from_value(notifications).unwrap_or_default(),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        })
    }
}
