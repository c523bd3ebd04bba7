//! Provider mocks and fixtures shared by the scheduler tests.

use async_trait::async_trait;
use mockall::mock;
use pipeline_core::config::Config;
use pipeline_core::db::{MemoryRecordStore, RecordStore};
use pipeline_core::providers::{AnalysisProvider, DecisionProvider, LogNotifier, MarketDataProvider};
use pipeline_core::types::{
    Analysis, ChartPattern, Decision, Direction, Opportunity, PriceHistory, PriceSnapshot,
    Recommendation,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use trading_engine::{ExecutorConfig, OrderExecutor};

use crate::cycle::{Pipeline, Providers};

mock! {
    pub Market {}

    #[async_trait]
    impl MarketDataProvider for Market {
        async fn scan(&self) -> pipeline_core::Result<Vec<Opportunity>>;
        async fn current_price(&self, symbol: &str) -> pipeline_core::Result<PriceSnapshot>;
        async fn history(&self, symbol: &str, lookback: usize) -> pipeline_core::Result<PriceHistory>;
    }
}

mock! {
    pub Analyst {}

    #[async_trait]
    impl AnalysisProvider for Analyst {
        async fn analyze(&self, opportunity: &Opportunity) -> pipeline_core::Result<Analysis>;
    }
}

mock! {
    pub Decider {}

    #[async_trait]
    impl DecisionProvider for Decider {
        async fn decide(&self, opportunity: &Opportunity, analysis: &Analysis) -> pipeline_core::Result<Decision>;
    }
}

pub fn opportunity(symbol: &str, change_pct: f64) -> Opportunity {
    Opportunity::new(symbol, Decimal::new(100, 0), Decimal::new(2_000_000, 0), change_pct)
}

pub fn snapshot(symbol: &str, price: Decimal) -> PriceSnapshot {
    PriceSnapshot {
        symbol: symbol.to_string(),
        price,
        volume: Decimal::new(2_000_000, 0),
        timestamp: chrono::Utc::now(),
    }
}

/// A confident long with a dominant bullish pattern: passes escalation.
pub fn bullish_analysis(symbol: &str) -> Analysis {
    let mut analysis = Analysis::neutral(symbol);
    analysis.degraded = false;
    analysis.confidence = 0.85;
    analysis.recommendation = Recommendation::Long;
    analysis.patterns = vec![ChartPattern {
        name: "ascending_triangle".to_string(),
        direction: Some(Direction::Long),
        strength: 0.8,
        target_price: Some(108.0),
    }];
    analysis.indicators.atr = Some(2.0);
    analysis
}

/// LONG at 100 with leverage 6 and a 97 stop.
pub fn long_decision(symbol: &str) -> Decision {
    let mut decision = Decision::neutral(symbol);
    decision.degraded = false;
    decision.signal = Recommendation::Long;
    decision.confidence = 0.8;
    decision.leverage = Decimal::new(6, 0);
    decision.entry_price = Some(Decimal::new(100, 0));
    decision.stop_loss = Some(Decimal::new(97, 0));
    decision.take_profits = vec![Decimal::new(103, 0)];
    decision
}

pub fn pipeline(market: MockMarket, analyst: MockAnalyst, decider: MockDecider) -> (Pipeline, Arc<MemoryRecordStore>) {
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = pipeline_with_store(market, analyst, decider, store.clone());
    (pipeline, store)
}

pub fn pipeline_with_store(
    market: MockMarket,
    analyst: MockAnalyst,
    decider: MockDecider,
    store: Arc<dyn RecordStore>,
) -> Pipeline {
    let providers = Providers {
        market: Arc::new(market),
        analyst: Arc::new(analyst),
        decider: Arc::new(decider),
    };
    Pipeline::new(
        &Config::test_config(),
        providers,
        store,
        OrderExecutor::new(ExecutorConfig::default()),
        Arc::new(LogNotifier),
    )
}
