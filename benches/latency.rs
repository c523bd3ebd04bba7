//! Latency benchmarks for the per-tick and per-cycle hot paths.
//!
//! Run with: `cargo bench --bench latency`

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use pipeline_core::config::{ResolutionConfig, RiskConfig};
use pipeline_core::types::{ChartPattern, Direction, Indicators, Recommendation, TpLadder};
use risk_manager::{trailing_percentage, AdaptiveTpRecord, TargetLadder, TrailingStopRecord};
use trading_engine::{AuxiliarySignals, ContradictionResolver};

fn long_record(config: &RiskConfig) -> TrailingStopRecord {
    let ladder = TpLadder::from_reference(Decimal::new(100, 0), Direction::Long);
    TrailingStopRecord::new(
        "BTCUSDT",
        Uuid::new_v4(),
        Decimal::new(6, 0),
        Decimal::new(97, 0),
        ladder,
        config,
    )
}

/// Random walk around the entry, in Decimal.
fn price_path(len: usize) -> Vec<Decimal> {
    let mut rng = rand::thread_rng();
    let mut price = 100.0_f64;
    (0..len)
        .map(|_| {
            price = (price + rng.gen_range(-0.8..0.9)).max(80.0);
            Decimal::from_f64(price).unwrap_or(Decimal::ONE_HUNDRED).round_dp(2)
        })
        .collect()
}

/// Benchmark tier crossing detection and stop computation.
fn bench_tier_crossing(c: &mut Criterion) {
    let mut group = c.benchmark_group("tier_crossing");
    let config = RiskConfig::default();
    let record = long_record(&config);

    for (label, price) in [
        ("below_tp1", Decimal::new(101, 0)),
        ("tp2", Decimal::new(103, 0)),
        ("tp5", Decimal::new(120, 0)),
    ] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("evaluate", label), &price, |b, price| {
            b.iter(|| black_box(record.evaluate(black_box(*price))))
        });
    }

    for len in [10, 100, 1000].iter() {
        let path = price_path(*len);
        group.throughput(Throughput::Elements(*len as u64));
        group.bench_with_input(BenchmarkId::new("price_path", len), &path, |b, path| {
            b.iter(|| {
                let mut record = record.clone();
                let now = Utc::now();
                for price in path {
                    black_box(record.on_price(*price, now));
                }
                record.current_stop_loss
            })
        });
    }

    group.bench_function("trailing_percentage", |b| {
        b.iter(|| black_box(trailing_percentage(black_box(Decimal::new(10, 0)), &config)))
    });

    group.finish();
}

/// Benchmark regime classification and ladder rescaling.
fn bench_regime_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("regime_evaluation");
    let config = RiskConfig::default();
    let entry = Decimal::new(100, 0);
    let ladder = TargetLadder::from_tp_ladder(&TpLadder::from_reference(entry, Direction::Long));
    let entry_time = Utc::now() - Duration::minutes(35);
    let record = AdaptiveTpRecord::new(
        "ETHUSDT",
        Uuid::new_v4(),
        Direction::Long,
        entry,
        ladder,
        Decimal::new(1_000_000, 0),
        entry_time,
    );

    group.bench_function("classify", |b| {
        let now = Utc::now();
        b.iter(|| {
            black_box(record.classify(
                black_box(Decimal::new(12, 1)),
                black_box(Decimal::new(1_200_000, 0)),
                now,
                &config,
            ))
        })
    });

    group.bench_function("evaluate_to_bear", |b| {
        let now = Utc::now();
        b.iter(|| {
            let mut record = record.clone();
            black_box(record.evaluate_at(Decimal::new(1005, 1), Decimal::new(1_000_000, 0), now, &config))
        })
    });

    group.bench_function("rescale", |b| {
        b.iter(|| black_box(ladder.rescaled(entry, config.bear_multipliers)))
    });

    group.finish();
}

/// Benchmark contradiction detection and candidate scoring.
fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    let resolver = ContradictionResolver::new(ResolutionConfig::default());

    let quiet = AuxiliarySignals {
        entry_price: Some(100.0),
        ..AuxiliarySignals::default()
    };
    let contested = AuxiliarySignals {
        entry_price: Some(100.0),
        pattern: Some(ChartPattern {
            name: "bull_flag".to_string(),
            direction: Some(Direction::Long),
            strength: 0.8,
            target_price: Some(107.5),
        }),
        indicators: Indicators {
            rsi: Some(24.0),
            macd_histogram: Some(0.02),
            bollinger_position: Some(-0.9),
            atr: Some(2.5),
            ..Indicators::default()
        },
        support: Some(97.0),
        resistance: Some(104.0),
    };

    group.bench_function("passthrough", |b| {
        b.iter(|| black_box(resolver.resolve(Recommendation::Long, black_box(&quiet))))
    });

    group.bench_function("three_candidates", |b| {
        b.iter(|| black_box(resolver.resolve(Recommendation::Hold, black_box(&contested))))
    });

    group.bench_function("signal_strength", |b| {
        b.iter(|| black_box(resolver.signal_strength(black_box(&contested.indicators), Direction::Long)))
    });

    group.finish();
}

/// Benchmark ladder construction (once per executed decision).
fn bench_ladder_construction(c: &mut Criterion) {
    c.bench_function("tp_ladder_from_reference", |b| {
        b.iter(|| black_box(TpLadder::from_reference(black_box(Decimal::new(6543210, 2)), Direction::Short)))
    });
}

criterion_group!(
    benches,
    bench_tier_crossing,
    bench_regime_evaluation,
    bench_resolution,
    bench_ladder_construction,
);

criterion_main!(benches);
