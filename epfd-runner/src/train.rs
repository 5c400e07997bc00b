//! Training stage: walk-forward validation then a full-history refit for
//! every configured quantile.

use crate::config::PipelineConfig;
use crate::feature_table::FeatureTable;
use crate::pipeline::PipelineError;
use crate::walk_forward::{create_folds, validate_quantile, QuantileValidation};
use chrono::{DateTime, Duration, Utc};
use epfd_core::features::FeatureRow;
use epfd_core::model::{LinearQuantileModel, ModelStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Contents of `metrics_quantiles.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub trained_at: DateTime<Utc>,
    pub config_hash: String,
    pub rows: usize,
    pub first_ts: DateTime<Utc>,
    pub last_ts: DateTime<Utc>,
    pub n_splits: usize,
    pub features: Vec<String>,
    /// Keyed by quantile id (`q05`, ...).
    pub quantiles: BTreeMap<String, QuantileValidation>,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub report: TrainingReport,
    pub artifacts: Vec<PathBuf>,
    pub metrics_path: PathBuf,
}

/// Restrict rows to the trailing training window, if one is configured.
pub fn training_window(rows: Vec<FeatureRow>, window_days: Option<i64>) -> Vec<FeatureRow> {
    let (Some(days), Some(last)) = (window_days, rows.last().map(|r| r.ts)) else {
        return rows;
    };
    let cutoff = last - Duration::days(days);
    rows.into_iter().filter(|r| r.ts > cutoff).collect()
}

pub fn run_training(config: &PipelineConfig) -> Result<TrainOutcome, PipelineError> {
    let set = config.feature_set();
    let quantiles = config.quantiles()?;
    let table = FeatureTable::new(&config.paths.feature_table);
    let rows = training_window(table.read(&set)?, config.model.train_window_days);
    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return Err(PipelineError::EmptyFeatureTable {
            path: table.path().to_path_buf(),
        });
    };
    let (first_ts, last_ts) = (first.ts, last.ts);

    let names = set.input_names();
    let xs: Vec<Vec<f64>> = rows.iter().map(|r| r.input_vector(&set)).collect();
    let ys: Vec<f64> = rows.iter().map(|r| r.target(&set)).collect();
    let folds = create_folds(rows.len(), config.model.n_splits)?;
    tracing::info!(
        rows = rows.len(),
        folds = folds.len(),
        quantiles = quantiles.len(),
        "training quantile models"
    );

    let store = ModelStore::new(&config.paths.artifacts_dir);
    let mut report = TrainingReport {
        trained_at: Utc::now(),
        config_hash: config.config_hash(),
        rows: rows.len(),
        first_ts,
        last_ts,
        n_splits: config.model.n_splits,
        features: names.clone(),
        quantiles: BTreeMap::new(),
    };
    let mut artifacts = Vec::with_capacity(quantiles.len());

    for q in quantiles {
        let validation = validate_quantile(q, &names, &xs, &ys, &folds, &config.model.params)?;
        tracing::info!(
            quantile = %q,
            mae = validation.mae,
            rmse = validation.rmse,
            pinball = validation.pinball,
            "walk-forward validated"
        );

        let model = LinearQuantileModel::fit(q, names.clone(), &xs, &ys, &config.model.params)?;
        artifacts.push(store.save(&model)?);
        report.quantiles.insert(q.id(), validation);
    }

    let metrics_path = config.paths.metrics_path();
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| PipelineError::Io(format!("metrics serialization: {e}")))?;
    std::fs::write(&metrics_path, json)
        .map_err(|e| PipelineError::Io(format!("write {}: {e}", metrics_path.display())))?;

    Ok(TrainOutcome {
        report,
        artifacts,
        metrics_path,
    })
}
