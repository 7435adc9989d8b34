//! Criterion benchmarks for the backtest hot path.
//!
//! Run with: `cargo bench -p stratbox-runner`

use chrono::{DateTime, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use stratbox_core::domain::{Bar, Signal, SignalKind};
use stratbox_runner::BacktestCalculator;

fn ts(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

/// Alternating BUY/SELL stream with drifting prices.
fn signal_stream(pairs: usize) -> Vec<Signal> {
    let mut signals = Vec::with_capacity(pairs * 2);
    for i in 0..pairs {
        let base = 100.0 + (i % 50) as f64;
        signals.push(Signal::new(ts(i as i64 * 2), SignalKind::Buy, base));
        signals.push(Signal::new(
            ts(i as i64 * 2 + 1),
            SignalKind::Sell,
            base + if i % 3 == 0 { -1.5 } else { 2.0 },
        ));
    }
    signals
}

fn bar_series(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = 100.0 + (i % 50) as f64;
            Bar {
                timestamp: ts(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10_000.0,
            }
        })
        .collect()
}

fn bench_calculate(c: &mut Criterion) {
    let mut group = c.benchmark_group("backtest_calculate");
    for pairs in [10, 100, 1_000] {
        let signals = signal_stream(pairs);
        let bars = bar_series(pairs * 2);
        let calculator = BacktestCalculator::new(10_000.0);

        group.bench_with_input(BenchmarkId::from_parameter(pairs), &pairs, |b, _| {
            b.iter(|| calculator.calculate(black_box(&signals), black_box(&bars)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_calculate);
criterion_main!(benches);
