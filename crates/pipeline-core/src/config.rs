//! Configuration management for the signal pipeline.
//!
//! Two entry points: [`Config::from_env`] for container deployments and
//! [`Config::from_file`] for a TOML/YAML/JSON file layered with `PIPELINE__*`
//! environment overrides. Every section has defaults reproducing the
//! production constants, so partial files are valid.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub alerts: AlertsConfig,
    pub providers: ProvidersConfig,
    pub pipeline: PipelineConfig,
    pub admission: AdmissionConfig,
    pub resolution: ResolutionConfig,
    pub risk: RiskConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL. Without it the pipeline keeps records in memory.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL for event forwarding. Optional.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AlertsConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub discord_webhook_url: Option<String>,
}

impl AlertsConfig {
    pub fn is_configured(&self) -> bool {
        (self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some())
            || self.discord_webhook_url.is_some()
    }
}

/// Endpoints of the external market-data, analysis and decision services.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub market_data_url: Option<String>,
    pub analysis_url: Option<String>,
    pub decision_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            market_data_url: None,
            analysis_url: None,
            decision_url: None,
            timeout_secs: 60,
        }
    }
}

/// Scheduling and fan-out settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Interval between full scan cycles (seconds).
    pub cycle_interval_secs: u64,
    /// Interval between monitor ticks (seconds).
    pub monitor_tick_secs: u64,
    /// Dedup window applied to opportunities, analyses and decisions (hours).
    pub dedup_window_hours: i64,
    /// Top-ranked opportunities escalated per cycle.
    pub max_candidates: usize,
    /// Place real orders (false = paper trading).
    pub live_trading: bool,
    /// ATR period used when the analysis carries no ATR.
    pub atr_period: usize,
    /// Bars requested from the market-data provider for ATR.
    pub history_lookback: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 4 * 60 * 60,
            monitor_tick_secs: 30,
            dedup_window_hours: 4,
            max_candidates: 10,
            live_trading: false,
            atr_period: 14,
            history_lookback: 50,
        }
    }
}

/// Thresholds for escalating an analysis to the decision stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Below this the analysis is an implicit hold.
    pub min_confidence: f64,
    pub high_confidence: f64,
    /// How many of the five escalation signals must hold.
    pub min_signals: usize,
    /// Absolute 24h move (percent) for the momentum signal.
    pub min_move_pct: f64,
    /// 24h quote volume for the momentum signal.
    pub min_volume_24h: f64,
    pub min_expected_value: f64,
    /// Minimum strength for a pattern to count as dominant.
    pub dominant_pattern_strength: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.70,
            high_confidence: 0.80,
            min_signals: 2,
            min_move_pct: 5.0,
            min_volume_24h: 500_000.0,
            min_expected_value: 0.2,
            dominant_pattern_strength: 0.7,
        }
    }
}

/// Contradiction detection thresholds and candidate scoring constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// |MACD histogram| below this counts as no signal.
    pub macd_min_magnitude: f64,
    /// |Bollinger position| beyond this counts as extreme.
    pub bollinger_extreme: f64,
    /// Fraction of the opposite-band distance credited to a hold.
    pub hold_reward_fraction: f64,
    pub hold_max_rr: f64,
    pub pattern_max_rr: f64,
    pub technical_max_rr: f64,
    pub max_signal_strength: f64,
    /// ATR as a percent of price when none is available.
    pub default_atr_pct: f64,
    /// Stop distance (in ATR) for a zero-strength pattern.
    pub pattern_stop_atr: f64,
    /// Stop distance (in ATR) for a technical candidate.
    pub technical_stop_atr: f64,
    /// Target extension (in ATR) when no explicit target exists.
    pub extension_atr: f64,
    /// Band distance (in ATR) when support/resistance is unknown.
    pub default_band_atr: f64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            macd_min_magnitude: 0.0001,
            bollinger_extreme: 0.8,
            hold_reward_fraction: 0.6,
            hold_max_rr: 3.0,
            pattern_max_rr: 5.0,
            technical_max_rr: 4.0,
            max_signal_strength: 1.5,
            default_atr_pct: 2.0,
            pattern_stop_atr: 2.0,
            technical_stop_atr: 1.5,
            extension_atr: 3.0,
            default_band_atr: 2.0,
        }
    }
}

/// Trailing-stop and adaptive take-profit constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Trail width (percent) at the reference leverage.
    pub base_trailing_pct: Decimal,
    pub reference_leverage: Decimal,
    /// Leverage values below this are treated as this.
    pub min_leverage: Decimal,
    pub min_trailing_pct: Decimal,
    pub max_trailing_pct: Decimal,
    /// TP1 must have been hit within this many minutes for BULL.
    pub bull_window_mins: i64,
    pub bull_momentum_pct: Decimal,
    /// Fractional volume increase over entry volume required for BULL.
    pub bull_volume_gain: Decimal,
    pub bear_momentum_pct: Decimal,
    pub bear_volatility_pct: Decimal,
    /// Minutes after entry without TP1 before the position turns BEAR.
    pub tp1_timeout_mins: i64,
    pub bull_multiplier: Decimal,
    /// BEAR multipliers for tp2, tp3, tp4.
    pub bear_multipliers: [Decimal; 3],
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_trailing_pct: Decimal::new(30, 1),
            reference_leverage: Decimal::new(6, 0),
            min_leverage: Decimal::new(2, 0),
            min_trailing_pct: Decimal::new(15, 1),
            max_trailing_pct: Decimal::new(60, 1),
            bull_window_mins: 5,
            bull_momentum_pct: Decimal::ONE,
            bull_volume_gain: Decimal::new(10, 2),
            bear_momentum_pct: Decimal::new(-5, 1),
            bear_volatility_pct: Decimal::new(30, 1),
            tp1_timeout_mins: 30,
            bull_multiplier: Decimal::new(15, 1),
            bear_multipliers: [Decimal::new(8, 1), Decimal::new(7, 1), Decimal::new(7, 1)],
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            cycle_interval_secs: parse_env("CYCLE_INTERVAL_SECS")?
                .unwrap_or(defaults.cycle_interval_secs),
            monitor_tick_secs: parse_env("MONITOR_TICK_SECS")?.unwrap_or(defaults.monitor_tick_secs),
            dedup_window_hours: parse_env("DEDUP_WINDOW_HOURS")?
                .unwrap_or(defaults.dedup_window_hours),
            max_candidates: parse_env("MAX_CANDIDATES")?.unwrap_or(defaults.max_candidates),
            live_trading: env::var("LIVE_TRADING").map(|v| v == "true").unwrap_or(false),
            atr_period: parse_env("ATR_PERIOD")?.unwrap_or(defaults.atr_period),
            history_lookback: parse_env("HISTORY_LOOKBACK")?.unwrap_or(defaults.history_lookback),
        };

        let admission_defaults = AdmissionConfig::default();
        let admission = AdmissionConfig {
            min_confidence: parse_env("ADMISSION_MIN_CONFIDENCE")?
                .unwrap_or(admission_defaults.min_confidence),
            min_signals: parse_env("ADMISSION_MIN_SIGNALS")?
                .unwrap_or(admission_defaults.min_signals),
            ..admission_defaults
        };

        let config = Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok(),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS")?.unwrap_or(5),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok(),
            },
            alerts: AlertsConfig {
                telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
                telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
                discord_webhook_url: env::var("DISCORD_WEBHOOK_URL").ok(),
            },
            providers: ProvidersConfig {
                market_data_url: env::var("MARKET_DATA_URL").ok(),
                analysis_url: env::var("ANALYSIS_URL").ok(),
                decision_url: env::var("DECISION_URL").ok(),
                timeout_secs: parse_env("PROVIDER_TIMEOUT_SECS")?.unwrap_or(60),
            },
            pipeline,
            admission,
            resolution: ResolutionConfig::default(),
            risk: RiskConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, with `PIPELINE__SECTION__KEY`
    /// environment overrides.
    #[allow(clippy::result_large_err)]
    pub fn from_file(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("PIPELINE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.cycle_interval_secs == 0 || self.pipeline.monitor_tick_secs == 0 {
            return Err(Error::Config {
                message: "cycle and monitor intervals must be positive".to_string(),
            });
        }
        if self.pipeline.max_candidates == 0 {
            return Err(Error::Config {
                message: "max_candidates must be at least 1".to_string(),
            });
        }
        if self.risk.min_trailing_pct > self.risk.max_trailing_pct {
            return Err(Error::Config {
                message: "min_trailing_pct exceeds max_trailing_pct".to_string(),
            });
        }
        Ok(())
    }

    /// Load configuration for testing (with defaults).
    pub fn test_config() -> Self {
        Self {
            pipeline: PipelineConfig {
                cycle_interval_secs: 60,
                monitor_tick_secs: 1,
                ..PipelineConfig::default()
            },
            ..Self::default()
        }
    }
}

#[allow(clippy::result_large_err)]
fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| Error::Config {
            message: format!("{} has an invalid value: {}", key, raw),
        }),
        Err(_) => Ok(None),
    }
}
