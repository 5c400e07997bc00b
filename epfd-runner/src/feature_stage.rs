//! Feature stage: snapshots → reconciled hourly grid → feature table.

use crate::config::PipelineConfig;
use crate::feature_table::{FeatureTable, FeatureTableMeta};
use crate::pipeline::PipelineError;
use epfd_core::data::SnapshotStore;
use epfd_core::domain::{Quantity, Source, SourceSeries};
use epfd_core::features::{build_features, BuildReport, EmptyCause};
use epfd_core::reconcile::{reconcile, ReconciledFrame, ReconciledSeries};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct FeatureStageSummary {
    pub report: BuildReport,
    pub meta: FeatureTableMeta,
    /// Points each source won, per quantity.
    pub origins: BTreeMap<Quantity, BTreeMap<Source, usize>>,
}

/// Reconcile every quantity from the snapshots in configured precedence.
/// Sources without a snapshot are skipped.
pub fn load_reconciled(
    config: &PipelineConfig,
    snapshots: &SnapshotStore,
) -> Result<Vec<ReconciledSeries>, PipelineError> {
    let mut out = Vec::with_capacity(Quantity::ALL.len());
    for quantity in Quantity::ALL {
        let mut loaded: Vec<SourceSeries> = Vec::new();
        for source in config.precedence.order(quantity) {
            match snapshots.load(*source, quantity)? {
                Some(series) => loaded.push(series),
                None => tracing::debug!(%source, %quantity, "no snapshot"),
            }
        }
        let ascending: Vec<&SourceSeries> = loaded.iter().collect();
        let series = reconcile(quantity, &ascending);
        tracing::info!(%quantity, points = series.len(), origins = ?series.origin_counts(), "reconciled");
        out.push(series);
    }
    Ok(out)
}

/// Map an empty build to the error naming its cause.
fn empty_error(cause: EmptyCause) -> PipelineError {
    match cause {
        EmptyCause::DriverAbsent(quantities) => PipelineError::DriverAbsent(quantities),
        EmptyCause::InsufficientHistory { grid_rows, required } => {
            PipelineError::InsufficientHistory { grid_rows, required }
        }
        EmptyCause::NoCompleteRows => PipelineError::NoCompleteRows,
    }
}

pub fn run_feature_stage(config: &PipelineConfig) -> Result<FeatureStageSummary, PipelineError> {
    let snapshots = SnapshotStore::new(&config.paths.raw_dir);
    let series = load_reconciled(config, &snapshots)?;
    let origins = series
        .iter()
        .map(|s| (s.quantity, s.origin_counts()))
        .collect();

    let frame = ReconciledFrame::align(&series);
    let set = config.feature_set();
    let calendar = config.calendar_context()?;
    let build = build_features(&frame, &set, &calendar);
    tracing::info!(
        grid_rows = build.report.grid_rows,
        kept = build.report.kept_rows,
        warmup = build.report.warmup_rows,
        incomplete = build.report.incomplete_rows,
        "features built"
    );
    if let Some(cause) = build.report.empty_cause() {
        return Err(empty_error(cause));
    }

    let table = FeatureTable::new(&config.paths.feature_table);
    let meta = table.write(&build.rows, &set)?;
    tracing::info!(rows = meta.row_count, path = %table.path().display(), "feature table written");
    Ok(FeatureStageSummary {
        report: build.report,
        meta,
        origins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use epfd_core::domain::TimePoint;
    use std::path::Path;

    fn config_in(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.paths.raw_dir = dir.join("raw");
        config.paths.feature_table = dir.join("features/hourly.parquet");
        config
    }

    fn write(store: &SnapshotStore, source: Source, quantity: Quantity, hours: i64, f: impl Fn(i64) -> f64) {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let points = (0..hours).map(|h| TimePoint::new(t0 + Duration::hours(h), f(h)));
        store
            .merge_and_write(&SourceSeries::from_points(source, quantity, points), false)
            .unwrap();
    }

    fn seed_all(store: &SnapshotStore, hours: i64) {
        write(store, Source::Opsd, Quantity::Price, hours, |h| 50.0 + (h % 24) as f64);
        write(store, Source::Opsd, Quantity::Load, hours, |h| 45_000.0 + 100.0 * (h % 24) as f64);
        write(store, Source::Opsd, Quantity::Wind, hours, |h| 8_000.0 + (h % 7) as f64);
        write(store, Source::Opsd, Quantity::Solar, hours, |h| if h % 24 < 6 { 0.0 } else { 5_000.0 });
    }

    #[test]
    fn higher_precedence_source_wins() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = SnapshotStore::new(&config.paths.raw_dir);
        write(&store, Source::Opsd, Quantity::Price, 3, |h| [10.0, 12.0, 11.0][h as usize]);
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        store
            .merge_and_write(
                &SourceSeries::from_points(Source::Entsoe, Quantity::Price, [TimePoint::new(t1, 99.0)]),
                false,
            )
            .unwrap();

        let series = load_reconciled(&config, &store).unwrap();
        let price = &series[Quantity::Price.index()];
        let values: Vec<f64> = price.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10.0, 99.0, 11.0]);
        assert_eq!(price.origin_counts().get(&Source::Entsoe), Some(&1));
    }

    #[test]
    fn corrupt_higher_precedence_snapshot_fails_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = SnapshotStore::new(&config.paths.raw_dir);
        seed_all(&store, 24 * 10);
        write(&store, Source::Entsoe, Quantity::Price, 24 * 10, |_| 99.0);
        std::fs::write(
            config.paths.raw_dir.join("source=entsoe").join("price.parquet"),
            b"truncated",
        )
        .unwrap();

        let err = run_feature_stage(&config).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Data(epfd_core::data::DataError::SnapshotError(_))
        ));
        assert!(!FeatureTable::new(&config.paths.feature_table).exists());

        // The quarantined source keeps failing until it is re-fetched.
        assert!(load_reconciled(&config, &store).is_err());
    }

    #[test]
    fn stage_writes_feature_table() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        seed_all(&SnapshotStore::new(&config.paths.raw_dir), 24 * 10);

        let summary = run_feature_stage(&config).unwrap();
        assert!(summary.meta.row_count > 0);
        assert_eq!(summary.report.kept_rows, summary.meta.row_count);
        assert!(FeatureTable::new(&config.paths.feature_table).exists());
    }

    #[test]
    fn short_history_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        seed_all(&SnapshotStore::new(&config.paths.raw_dir), 10);

        let err = run_feature_stage(&config).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientHistory { grid_rows: 10, .. }));
        assert!(!FeatureTable::new(&config.paths.feature_table).exists());
    }

    #[test]
    fn absent_driver_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = SnapshotStore::new(&config.paths.raw_dir);
        write(&store, Source::Opsd, Quantity::Price, 24 * 10, |h| h as f64);
        write(&store, Source::Opsd, Quantity::Load, 24 * 10, |_| 40_000.0);
        write(&store, Source::Opsd, Quantity::Wind, 24 * 10, |_| 1_000.0);

        match run_feature_stage(&config).unwrap_err() {
            PipelineError::DriverAbsent(q) => assert_eq!(q, vec![Quantity::Solar]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
