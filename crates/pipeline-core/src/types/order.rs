//! Order and notification types exchanged with execution and alerting
//! collaborators.

use super::Direction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entry order for a directional decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub leverage: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl OrderRequest {
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        leverage: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            direction,
            leverage,
            entry_price,
            stop_loss,
            take_profit: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_take_profit(mut self, take_profit: Decimal) -> Self {
        self.take_profit = Some(take_profit);
        self
    }
}

/// Exchange acknowledgement of an accepted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub fill_price: Option<Decimal>,
    pub accepted_at: DateTime<Utc>,
}

/// Kind of operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StopAdvanced,
    RegimeChanged,
}

/// Fire-and-forget operator notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub symbol: String,
    pub position_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        symbol: impl Into<String>,
        position_id: Uuid,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            symbol: symbol.into(),
            position_id,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}
