//! Stage orchestration and the runner's error type.
//!
//! `run_pipeline` chains fetch → build → migrate → load → dq → train →
//! forecast → save and stops at the first failing stage.

use crate::config::{ConfigError, PipelineConfig};
use crate::feature_stage::{run_feature_stage, FeatureStageSummary};
use crate::feature_table::{FeatureTable, FeatureTableError};
use crate::fetch::{build_fetcher, fetch_into, FetchOptions, FetchSummary};
use crate::forecast_stage::{read_forecast_csv, run_forecast, ForecastOutcome};
use crate::store::{QualityReport, Store, StoreError};
use crate::train::{run_training, TrainOutcome};
use crate::walk_forward::WalkForwardError;
use chrono::{DateTime, Utc};
use epfd_core::data::{DataError, SnapshotStore};
use epfd_core::domain::{Quantity, Source};
use epfd_core::forecast::ForecastError;
use epfd_core::model::ModelError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error(transparent)]
    FeatureTable(#[from] FeatureTableError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("forecast error: {0}")]
    Forecast(#[from] ForecastError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("walk-forward error: {0}")]
    WalkForward(#[from] WalkForwardError),

    #[error("no usable feature rows: {} absent from every source", quantity_list(.0))]
    DriverAbsent(Vec<Quantity>),

    #[error("no usable feature rows: {grid_rows} hourly rows, longest lookback needs more than {required}")]
    InsufficientHistory { grid_rows: usize, required: u32 },

    #[error("no usable feature rows: no hour has every field present")]
    NoCompleteRows,

    #[error("feature table {} has no rows", path.display())]
    EmptyFeatureTable { path: PathBuf },

    #[error("forecast file {} not found; run `forecast` first", path.display())]
    MissingForecast { path: PathBuf },

    #[error("data quality check failed: {0}")]
    DataQuality(String),

    #[error("I/O error: {0}")]
    Io(String),
}

fn quantity_list(quantities: &[Quantity]) -> String {
    quantities
        .iter()
        .map(|q| q.key())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Store stages ────────────────────────────────────────────────────

/// Open the database and bring it to the latest schema.
pub fn open_store(config: &PipelineConfig) -> Result<Store, PipelineError> {
    let store = Store::open(&config.paths.database)?;
    store.migrate()?;
    Ok(store)
}

pub fn run_migrate(config: &PipelineConfig) -> Result<Vec<&'static str>, PipelineError> {
    let store = Store::open(&config.paths.database)?;
    Ok(store.migrate()?)
}

/// Upsert the whole feature table into `features_hourly`.
pub fn run_load_features(config: &PipelineConfig) -> Result<usize, PipelineError> {
    let rows = FeatureTable::new(&config.paths.feature_table).read(&config.feature_set())?;
    let mut store = open_store(config)?;
    let n = store.upsert_features(&rows)?;
    tracing::info!(rows = n, "features loaded into store");
    Ok(n)
}

/// Run the data-quality checks; a failed check is an error.
pub fn run_quality_checks(
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<QualityReport, PipelineError> {
    let report = open_store(config)?.check_quality(now)?;
    let failures = report.failures();
    if !failures.is_empty() {
        return Err(PipelineError::DataQuality(failures.join("; ")));
    }
    tracing::info!(recent_rows = report.recent_rows, "data quality ok");
    Ok(report)
}

/// Upsert the exported forecast CSV into `predictions_hourly`.
pub fn run_save_forecast(config: &PipelineConfig) -> Result<usize, PipelineError> {
    let rows = read_forecast_csv(&config.paths.forecast_csv)?;
    let mut store = open_store(config)?;
    let n = store.upsert_predictions(&rows)?;
    tracing::info!(rows = n, "forecast saved to store");
    Ok(n)
}

// ── Full run ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Sources to fetch first; empty skips fetching.
    pub sources: Vec<Source>,
    pub fetch: FetchOptions,
    /// Reference instant for the fetch window and the quality checks.
    pub now: DateTime<Utc>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sources: vec![Source::Opsd, Source::Smard, Source::Entsoe],
            fetch: FetchOptions::default(),
            now: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub fetched: Vec<FetchSummary>,
    pub features: FeatureStageSummary,
    pub migrations: Vec<&'static str>,
    pub features_loaded: usize,
    pub quality: QualityReport,
    pub training: TrainOutcome,
    pub forecast: ForecastOutcome,
    pub predictions_saved: usize,
}

pub fn run_pipeline(
    config: &PipelineConfig,
    opts: &RunOptions,
) -> Result<PipelineSummary, PipelineError> {
    let snapshots = SnapshotStore::new(&config.paths.raw_dir);
    let window = opts.fetch.window(opts.now);
    let mut fetched = Vec::with_capacity(opts.sources.len());
    for source in &opts.sources {
        let fetcher = build_fetcher(config, *source, opts.fetch.resolution)?;
        fetched.push(fetch_into(fetcher.as_ref(), &snapshots, window)?);
    }

    let features = run_feature_stage(config)?;
    let migrations = run_migrate(config)?;
    let features_loaded = run_load_features(config)?;
    let quality = run_quality_checks(config, opts.now)?;
    let training = run_training(config)?;
    let forecast = run_forecast(config)?;
    let predictions_saved = run_save_forecast(config)?;

    tracing::info!(
        features = features_loaded,
        forecast_hours = forecast.rows.len(),
        "pipeline completed"
    );
    Ok(PipelineSummary {
        fetched,
        features,
        migrations,
        features_loaded,
        quality,
        training,
        forecast,
        predictions_saved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_absent_message_names_quantities() {
        let err = PipelineError::DriverAbsent(vec![Quantity::Wind, Quantity::Solar]);
        assert_eq!(
            err.to_string(),
            "no usable feature rows: wind, solar absent from every source"
        );
    }

    #[test]
    fn missing_feature_table_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.paths.feature_table = dir.path().join("none.parquet");
        config.paths.database = dir.path().join("epfd.sqlite");
        assert!(matches!(
            run_load_features(&config),
            Err(PipelineError::FeatureTable(FeatureTableError::Missing { .. }))
        ));
    }

    #[test]
    fn empty_store_fails_quality_checks() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.paths.database = dir.path().join("epfd.sqlite");
        assert!(matches!(
            run_quality_checks(&config, Utc::now()),
            Err(PipelineError::DataQuality(_))
        ));
    }

    #[test]
    fn save_without_forecast_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.paths.forecast_csv = dir.path().join("fan.csv");
        config.paths.database = dir.path().join("epfd.sqlite");
        assert!(matches!(
            run_save_forecast(&config),
            Err(PipelineError::MissingForecast { .. })
        ));
    }
}
