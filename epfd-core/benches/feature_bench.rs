//! Criterion benchmarks for epfd hot paths.
//!
//! Benchmarks:
//! 1. Reconcile three sources and align onto the hourly grid
//! 2. Feature build over the aligned grid
//! 3. Linear quantile fit
//! 4. 24-hour autoregressive forecast

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use epfd_core::calendar::CalendarContext;
use epfd_core::domain::{Quantity, Source, SourceSeries, TimePoint};
use epfd_core::features::{build_features, FeatureSet, FeatureSpec};
use epfd_core::forecast::{ForecastSettings, Forecaster};
use epfd_core::model::{
    LinearQuantileModel, LinearQuantileParams, Quantile, QuantileModels, QuantileRegressor,
};
use epfd_core::reconcile::{reconcile, ReconciledFrame};

// ── Helpers ──────────────────────────────────────────────────────────

fn t(h: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
}

fn make_source(source: Source, q: Quantity, hours: i64, offset: f64) -> SourceSeries {
    SourceSeries::from_points(
        source,
        q,
        (0..hours).map(|h| {
            let daily = (h as f64 * std::f64::consts::TAU / 24.0).sin();
            TimePoint::new(t(h), offset * (1.0 + 0.3 * daily))
        }),
    )
}

fn make_frame(hours: i64) -> ReconciledFrame {
    let series: Vec<_> = [
        (Quantity::Price, 80.0),
        (Quantity::Load, 55_000.0),
        (Quantity::Wind, 15_000.0),
        (Quantity::Solar, 6_000.0),
    ]
    .into_iter()
    .map(|(q, base)| {
        let opsd = make_source(Source::Opsd, q, hours, base);
        let smard = make_source(Source::Smard, q, hours / 2, base * 1.01);
        reconcile(q, &[&opsd, &smard])
    })
    .collect();
    ReconciledFrame::align(&series)
}

// ── 1. Reconcile + align ─────────────────────────────────────────────

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_align");
    for &hours in &[24 * 30, 24 * 365] {
        let opsd = make_source(Source::Opsd, Quantity::Price, hours, 80.0);
        let smard = make_source(Source::Smard, Quantity::Price, hours, 81.0);
        let entsoe = make_source(Source::Entsoe, Quantity::Price, hours / 4, 82.0);
        group.bench_with_input(BenchmarkId::new("price", hours), &hours, |b, _| {
            b.iter(|| {
                let merged = reconcile(Quantity::Price, black_box(&[&opsd, &smard, &entsoe]));
                ReconciledFrame::align(&[merged])
            })
        });
    }
    group.finish();
}

// ── 2. Feature build ─────────────────────────────────────────────────

fn bench_features(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_build");
    let set = FeatureSet::from_spec(&FeatureSpec::default());
    let cal = CalendarContext::germany();
    for &hours in &[24 * 30, 24 * 365] {
        let frame = make_frame(hours);
        group.bench_with_input(BenchmarkId::new("default_features", hours), &hours, |b, _| {
            b.iter(|| build_features(black_box(&frame), &set, &cal))
        });
    }
    group.finish();
}

// ── 3. Fit ───────────────────────────────────────────────────────────

fn bench_fit(c: &mut Criterion) {
    let set = FeatureSet::from_spec(&FeatureSpec::default());
    let cal = CalendarContext::germany();
    let rows = build_features(&make_frame(24 * 60), &set, &cal).rows;
    let xs: Vec<Vec<f64>> = rows.iter().map(|r| r.input_vector(&set)).collect();
    let ys: Vec<f64> = rows.iter().map(|r| r.target(&set)).collect();
    let params = LinearQuantileParams::default();

    c.bench_function("linear_quantile_fit_q50", |b| {
        b.iter(|| {
            LinearQuantileModel::fit(
                Quantile::MEDIAN,
                set.input_names(),
                black_box(&xs),
                black_box(&ys),
                &params,
            )
        })
    });
}

// ── 4. Forecast ──────────────────────────────────────────────────────

fn bench_forecast(c: &mut Criterion) {
    let set = FeatureSet::from_spec(&FeatureSpec::default());
    let cal = CalendarContext::germany();
    let rows = build_features(&make_frame(24 * 60), &set, &cal).rows;
    let xs: Vec<Vec<f64>> = rows.iter().map(|r| r.input_vector(&set)).collect();
    let ys: Vec<f64> = rows.iter().map(|r| r.target(&set)).collect();
    let params = LinearQuantileParams {
        epochs: 50,
        ..LinearQuantileParams::default()
    };
    let models = QuantileModels::new(
        [10u8, 50, 90]
            .iter()
            .map(|p| {
                let q = Quantile::from_percent(*p).unwrap();
                let m = LinearQuantileModel::fit(q, set.input_names(), &xs, &ys, &params).unwrap();
                Box::new(m) as Box<dyn QuantileRegressor>
            })
            .collect(),
    );

    c.bench_function("forecast_24h", |b| {
        b.iter(|| {
            Forecaster::new(&set, &cal, &models, ForecastSettings::default())
                .forecast(black_box(&rows))
        })
    });
}

criterion_group!(
    benches,
    bench_reconcile,
    bench_features,
    bench_fit,
    bench_forecast
);
criterion_main!(benches);
