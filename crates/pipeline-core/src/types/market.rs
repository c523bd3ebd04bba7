//! Market data types consumed from the market-data provider.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A symbol surfaced by the market scan, candidate for escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub current_price: Decimal,
    /// 24-hour traded volume in quote currency.
    pub volume_24h: Decimal,
    /// Signed 24-hour price change, in percent.
    pub price_change_24h_pct: f64,
    /// Realised volatility estimate, in percent.
    #[serde(default)]
    pub volatility_pct: f64,
    /// Confidence of the upstream source reconciliation (0.0 - 1.0).
    #[serde(default = "default_data_confidence")]
    pub data_confidence: f64,
    #[serde(default = "default_source_count")]
    pub source_count: u32,
    #[serde(default = "Utc::now")]
    pub discovered_at: DateTime<Utc>,
}

fn default_data_confidence() -> f64 {
    1.0
}

fn default_source_count() -> u32 {
    1
}

impl Opportunity {
    pub fn new(symbol: impl Into<String>, price: Decimal, volume_24h: Decimal, change_pct: f64) -> Self {
        Self {
            symbol: symbol.into(),
            current_price: price,
            volume_24h,
            price_change_24h_pct: change_pct,
            volatility_pct: change_pct.abs(),
            data_confidence: default_data_confidence(),
            source_count: default_source_count(),
            discovered_at: Utc::now(),
        }
    }

    /// Ranking score for the scan stage: absolute move weighted by the order
    /// of magnitude of traded volume and by data confidence.
    pub fn score(&self) -> f64 {
        let volume = self.volume_24h.to_f64().unwrap_or(0.0).max(1.0);
        self.price_change_24h_pct.abs() * volume.log10() * self.data_confidence.clamp(0.0, 1.0)
    }
}

/// Point-in-time price and volume for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub price: Decimal,
    /// 24-hour traded volume in quote currency.
    #[serde(default)]
    pub volume: Decimal,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// One OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// OHLCV history annotated with reconciliation quality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceHistory {
    pub symbol: String,
    pub candles: Vec<Candle>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub source_count: u32,
}

impl PriceHistory {
    /// Average true range over the last `period` bars. `None` if there are not
    /// enough bars.
    pub fn atr(&self, period: usize) -> Option<f64> {
        if period == 0 || self.candles.len() < period + 1 {
            return None;
        }
        let true_ranges: Vec<f64> = self
            .candles
            .windows(2)
            .map(|w| {
                let prev_close = w[0].close;
                let bar = &w[1];
                (bar.high - bar.low)
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs())
            })
            .collect();
        let recent = &true_ranges[true_ranges.len() - period..];
        Some(recent.iter().sum::<f64>() / period as f64)
    }
}
