//! Order execution for accepted directional decisions.
//!
//! Paper mode fills at the decision's entry price. Live mode sets leverage and
//! places the order through the [`ExchangeAdapter`]; any exchange failure is a
//! rejected report, never retried here.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use pipeline_core::providers::ExchangeAdapter;
use pipeline_core::types::{Decision, Direction, OrderRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Metrics for order execution performance.
#[derive(Debug, Default, Clone)]
pub struct ExecutionMetrics {
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_rejected: u64,
    pub total_notional: Decimal,
    pub avg_latency_us: u64,
}

/// Configuration for the order executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Whether to actually execute orders (false = paper trading).
    pub live_trading: bool,
    /// Leverage ceiling applied to provider suggestions.
    pub max_leverage: Decimal,
    /// Stop distance (percent of entry) when the decision carries none.
    pub default_stop_pct: Decimal,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            live_trading: false,
            max_leverage: Decimal::new(20, 0),
            default_stop_pct: Decimal::new(3, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Filled,
    Rejected,
}

/// Outcome of executing one decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order: OrderRequest,
    pub status: ExecutionStatus,
    pub fill_price: Option<Decimal>,
    pub exchange_order_id: Option<String>,
    pub reason: Option<String>,
    pub paper: bool,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionReport {
    fn filled(order: OrderRequest, fill_price: Decimal, exchange_order_id: Option<String>, paper: bool) -> Self {
        Self {
            order,
            status: ExecutionStatus::Filled,
            fill_price: Some(fill_price),
            exchange_order_id,
            reason: None,
            paper,
            executed_at: Utc::now(),
        }
    }

    fn rejected(order: OrderRequest, reason: impl Into<String>, paper: bool) -> Self {
        Self {
            order,
            status: ExecutionStatus::Rejected,
            fill_price: None,
            exchange_order_id: None,
            reason: Some(reason.into()),
            paper,
            executed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Filled
    }

    /// Position reference for the risk engines.
    pub fn position_id(&self) -> Uuid {
        self.order.id
    }

    /// Fill price, or the requested entry when the exchange did not report one.
    pub fn entry_price(&self) -> Decimal {
        self.fill_price.unwrap_or(self.order.entry_price)
    }
}

/// Executes decisions in paper or live mode.
pub struct OrderExecutor {
    exchange: Option<Arc<dyn ExchangeAdapter>>,
    config: ExecutorConfig,
    metrics: RwLock<ExecutionMetrics>,
}

impl OrderExecutor {
    /// Paper-trading executor.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            exchange: None,
            config,
            metrics: RwLock::new(ExecutionMetrics::default()),
        }
    }

    /// Executor backed by an exchange adapter. Orders only reach the exchange
    /// when `config.live_trading` is set.
    pub fn with_exchange(exchange: Arc<dyn ExchangeAdapter>, config: ExecutorConfig) -> Self {
        info!(live_trading = %config.live_trading, "Created order executor with exchange adapter");
        Self {
            exchange: Some(exchange),
            ..Self::new(config)
        }
    }

    /// Check if executor is in live trading mode.
    pub fn is_live(&self) -> bool {
        self.config.live_trading && self.exchange.is_some()
    }

    /// Get current execution metrics.
    pub fn metrics(&self) -> ExecutionMetrics {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Build the entry order for a decision.
    ///
    /// Leverage is clamped to `[1, max_leverage]`. A missing or wrong-sided
    /// stop is replaced by `default_stop_pct` from entry.
    pub fn build_order(&self, decision: &Decision) -> Result<OrderRequest> {
        let direction = decision
            .signal
            .direction()
            .ok_or_else(|| anyhow!("decision {} for {} is not directional", decision.id, decision.symbol))?;
        let entry = decision
            .entry_price
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| anyhow!("decision {} for {} has no entry price", decision.id, decision.symbol))?;

        let leverage = decision.leverage.max(Decimal::ONE).min(self.config.max_leverage);
        let stop = decision
            .stop_loss
            .filter(|s| match direction {
                Direction::Long => *s < entry,
                Direction::Short => *s > entry,
            })
            .unwrap_or_else(|| {
                entry - direction.sign() * entry * self.config.default_stop_pct / Decimal::ONE_HUNDRED
            });

        let mut order = OrderRequest::new(&decision.symbol, direction, leverage, entry, stop);
        if let Some(tp) = decision.take_profits.first() {
            order = order.with_take_profit(*tp);
        }
        Ok(order)
    }

    /// Execute a directional decision.
    pub async fn execute(&self, decision: &Decision) -> Result<ExecutionReport> {
        let start = std::time::Instant::now();
        let order = self.build_order(decision)?;

        info!(
            order_id = %order.id,
            symbol = %order.symbol,
            direction = %order.direction,
            leverage = %order.leverage,
            entry = %order.entry_price,
            stop = %order.stop_loss,
            "Executing entry order"
        );

        let report = match (&self.exchange, self.config.live_trading) {
            (Some(exchange), true) => self.execute_live(exchange.as_ref(), order).await,
            (None, true) => {
                warn!("No exchange adapter for live trading - falling back to simulation");
                self.simulate(order)
            }
            _ => self.simulate(order),
        };

        // Update metrics
        {
            let mut metrics = self
                .metrics
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            metrics.orders_submitted += 1;
            if report.is_success() {
                metrics.orders_filled += 1;
                metrics.total_notional += report.entry_price() * report.order.leverage;
            } else {
                metrics.orders_rejected += 1;
            }
            let latency_us = start.elapsed().as_micros() as u64;
            metrics.avg_latency_us = (metrics.avg_latency_us * (metrics.orders_submitted - 1)
                + latency_us)
                / metrics.orders_submitted;
        }

        debug!(
            order_id = %report.order.id,
            status = ?report.status,
            latency_us = %start.elapsed().as_micros(),
            "Order execution complete"
        );

        Ok(report)
    }

    /// Close the exchange position for `symbol`. No-op in paper mode.
    pub async fn close(&self, symbol: &str) -> Result<()> {
        match (&self.exchange, self.config.live_trading) {
            (Some(exchange), true) => {
                exchange.close_position(symbol).await?;
                info!(symbol = %symbol, "Exchange position closed");
            }
            _ => info!(symbol = %symbol, "[PAPER] Simulated position close"),
        }
        Ok(())
    }

    async fn execute_live(&self, exchange: &dyn ExchangeAdapter, order: OrderRequest) -> ExecutionReport {
        if let Err(e) = exchange.set_leverage(&order.symbol, order.leverage).await {
            warn!(symbol = %order.symbol, error = %e, "Failed to set leverage");
            return ExecutionReport::rejected(order, format!("set leverage failed: {}", e), false);
        }

        match exchange.place_order(&order).await {
            Ok(ack) => {
                info!(
                    order_id = %order.id,
                    exchange_order_id = %ack.order_id,
                    "Live order accepted"
                );
                let fill = ack.fill_price.unwrap_or(order.entry_price);
                ExecutionReport::filled(order, fill, Some(ack.order_id), false)
            }
            Err(e) => {
                warn!(order_id = %order.id, symbol = %order.symbol, error = %e, "Order rejected");
                ExecutionReport::rejected(order, e.to_string(), false)
            }
        }
    }

    fn simulate(&self, order: OrderRequest) -> ExecutionReport {
        info!(
            order_id = %order.id,
            symbol = %order.symbol,
            price = %order.entry_price,
            "[PAPER] Simulated entry fill"
        );
        let price = order.entry_price;
        ExecutionReport::filled(order, price, None, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use pipeline_core::types::{OrderAck, Recommendation};

    mock! {
        Exchange {}

        #[async_trait]
        impl ExchangeAdapter for Exchange {
            async fn set_leverage(&self, symbol: &str, leverage: Decimal) -> pipeline_core::Result<()>;
            async fn place_order(&self, order: &OrderRequest) -> pipeline_core::Result<OrderAck>;
            async fn close_position(&self, symbol: &str) -> pipeline_core::Result<()>;
        }
    }

    fn long_decision() -> Decision {
        let mut decision = Decision::neutral("BTCUSDT");
        decision.signal = Recommendation::Long;
        decision.leverage = Decimal::new(6, 0);
        decision.entry_price = Some(Decimal::new(100, 0));
        decision
    }

    fn live_config() -> ExecutorConfig {
        ExecutorConfig {
            live_trading: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_paper_fill_uses_entry_and_default_stop() {
        let executor = OrderExecutor::new(ExecutorConfig::default());
        let report = executor.execute(&long_decision()).await.unwrap();

        assert!(report.is_success());
        assert!(report.paper);
        assert_eq!(report.entry_price(), Decimal::new(100, 0));
        assert_eq!(report.order.stop_loss, Decimal::new(97, 0));
        assert_eq!(executor.metrics().orders_filled, 1);
    }

    #[tokio::test]
    async fn test_hold_is_not_executable() {
        let executor = OrderExecutor::new(ExecutorConfig::default());
        let decision = Decision::neutral("BTCUSDT");
        assert!(executor.execute(&decision).await.is_err());
        assert_eq!(executor.metrics().orders_submitted, 0);
    }

    #[test]
    fn test_wrong_sided_stop_replaced_and_leverage_clamped() {
        let executor = OrderExecutor::new(ExecutorConfig::default());
        let mut decision = long_decision();
        decision.signal = Recommendation::Short;
        decision.stop_loss = Some(Decimal::new(95, 0));
        decision.leverage = Decimal::new(50, 0);

        let order = executor.build_order(&decision).unwrap();
        assert_eq!(order.stop_loss, Decimal::new(103, 0));
        assert_eq!(order.leverage, Decimal::new(20, 0));
    }

    #[tokio::test]
    async fn test_live_order_placed_after_leverage() {
        let mut exchange = MockExchange::new();
        let mut seq = mockall::Sequence::new();
        exchange
            .expect_set_leverage()
            .withf(|symbol, leverage| symbol == "BTCUSDT" && *leverage == Decimal::new(6, 0))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        exchange
            .expect_place_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(OrderAck {
                    order_id: "ex-1".to_string(),
                    fill_price: Some(Decimal::new(1001, 1)),
                    accepted_at: Utc::now(),
                })
            });

        let executor = OrderExecutor::with_exchange(Arc::new(exchange), live_config());
        let report = executor.execute(&long_decision()).await.unwrap();
        assert!(report.is_success());
        assert!(!report.paper);
        assert_eq!(report.entry_price(), Decimal::new(1001, 1));
        assert_eq!(report.exchange_order_id.as_deref(), Some("ex-1"));
    }

    #[tokio::test]
    async fn test_exchange_failure_is_rejection() {
        let mut exchange = MockExchange::new();
        exchange.expect_set_leverage().returning(|_, _| Ok(()));
        exchange
            .expect_place_order()
            .returning(|_| Err(pipeline_core::Error::Execution { message: "insufficient margin".into() }));

        let executor = OrderExecutor::with_exchange(Arc::new(exchange), live_config());
        let report = executor.execute(&long_decision()).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Rejected);
        assert!(report.reason.unwrap().contains("insufficient margin"));
        assert_eq!(executor.metrics().orders_rejected, 1);
    }
}
