//! Signal Scheduler
//!
//! Runs the signal pipeline: periodic scan/analysis/decision cycles plus the
//! trailing-stop and adaptive take-profit monitor.

use anyhow::{Context, Result};
use clap::Parser;
use pipeline_core::api::{HttpAnalysisProvider, HttpDecisionProvider, HttpMarketData};
use pipeline_core::config::Config;
use pipeline_core::db::{self, MemoryRecordStore, PgRecordStore, RecordStore};
use pipeline_core::providers::{LogNotifier, Notifier};
use risk_manager::TrailingStopRepository;
use scheduler::{Pipeline, Providers, RedisForwarder, Scheduler, WebhookNotifier};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trading_engine::{ExecutorConfig, OrderExecutor};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const HEALTH_FILE: &str = "/tmp/healthy";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML/YAML/JSON). Environment variables otherwise.
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single cycle and exit.
    #[arg(long, default_value_t = false)]
    once: bool,
}

fn touch_health_file() {
    let _ = std::fs::write(HEALTH_FILE, format!("{}", chrono::Utc::now().timestamp()));
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "scheduler=info,signal_scheduler=info,trading_engine=info,risk_manager=info,pipeline_core=warn,hyper=warn,sqlx=warn"
            .into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .with_context(|| format!("{} is not configured", name))
}

async fn build_scheduler(config: &Config) -> Result<Scheduler> {
    let timeout = config.providers.timeout_secs;
    let providers = Providers {
        market: Arc::new(HttpMarketData::new(
            required(&config.providers.market_data_url, "market data URL")?,
            timeout,
        )?),
        analyst: Arc::new(HttpAnalysisProvider::new(
            required(&config.providers.analysis_url, "analysis URL")?,
            timeout,
        )?),
        decider: Arc::new(HttpDecisionProvider::new(
            required(&config.providers.decision_url, "decision URL")?,
            timeout,
        )?),
    };

    let notifier: Arc<dyn Notifier> = if config.alerts.is_configured() {
        Arc::new(WebhookNotifier::new(config.alerts.clone()))
    } else {
        info!("No alert channel configured, notifications are logged only");
        Arc::new(LogNotifier)
    };

    if config.pipeline.live_trading {
        warn!("Live trading requested but no exchange adapter is wired, orders will be simulated");
    }
    let executor = OrderExecutor::new(ExecutorConfig {
        live_trading: config.pipeline.live_trading,
        ..ExecutorConfig::default()
    });

    let pipeline = if config.database.url.is_some() {
        let pool = db::create_pool(&config.database).await?;
        db::run_migrations(&pool).await?;
        info!("Connected to PostgreSQL, migrations applied");

        let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool.clone()));
        let pipeline = Pipeline::new(config, providers, store, executor, notifier)
            .with_trailing_repository(Arc::new(TrailingStopRepository::new(pool)));
        pipeline.trailing().load_active().await?;
        pipeline
    } else {
        warn!("DATABASE_URL not set, records are kept in memory");
        Pipeline::new(config, providers, Arc::new(MemoryRecordStore::new()), executor, notifier)
    };

    Ok(Scheduler::new(pipeline))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    info!("Starting Signal Scheduler");
    touch_health_file();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let scheduler = build_scheduler(&config).await?;

    let forwarder_shutdown = CancellationToken::new();
    if let Some(url) = &config.redis.url {
        match RedisForwarder::connect(url).await {
            Ok(forwarder) => {
                tokio::spawn(forwarder.run(scheduler.subscribe(), forwarder_shutdown.clone()));
            }
            Err(e) => warn!(error = %e, "Redis unavailable, events stay in-process"),
        }
    }

    if cli.once {
        let report = scheduler.run_cycle_once().await;
        info!(?report, "Single cycle finished");
        forwarder_shutdown.cancel();
        return Ok(());
    }

    scheduler.start()?;
    touch_health_file();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    scheduler.stop().await?;
    forwarder_shutdown.cancel();
    Ok(())
}
