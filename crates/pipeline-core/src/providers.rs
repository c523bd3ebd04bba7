//! Contracts for the external collaborators around the pipeline core.
//!
//! Implementations live at the edges (HTTP adapters in [`crate::api`], the
//! paper executor in `trading-engine`, webhook delivery in `scheduler`). The
//! core only ever talks to these traits.

use crate::types::{
    Analysis, Decision, Notification, Opportunity, OrderAck, OrderRequest, PriceHistory,
    PriceSnapshot,
};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Market scan, live price and OHLCV history.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Symbols worth looking at this cycle (unranked).
    async fn scan(&self) -> Result<Vec<Opportunity>>;

    /// Latest price and 24h volume.
    async fn current_price(&self, symbol: &str) -> Result<PriceSnapshot>;

    /// Up to `lookback` most recent bars.
    async fn history(&self, symbol: &str, lookback: usize) -> Result<PriceHistory>;
}

/// First-stage analyst.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self, opportunity: &Opportunity) -> Result<Analysis>;
}

/// Second-stage decision maker.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, opportunity: &Opportunity, analysis: &Analysis) -> Result<Decision>;
}

/// Exchange execution adapter. Retry policy belongs to the implementation.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn set_leverage(&self, symbol: &str, leverage: Decimal) -> Result<()>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    async fn close_position(&self, symbol: &str) -> Result<()>;
}

/// Operator notification channel. Delivery failures never affect trading.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that only logs; used when no alert channel is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            symbol = %notification.symbol,
            position_id = %notification.position_id,
            kind = ?notification.kind,
            "{}",
            notification.message
        );
        Ok(())
    }
}
