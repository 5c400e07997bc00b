//! Forecast stage: recent history + every configured quantile artifact →
//! an hourly fan for the horizon, exported as CSV.

use crate::config::PipelineConfig;
use crate::feature_table::FeatureTable;
use crate::pipeline::PipelineError;
use chrono::{DateTime, Utc};
use epfd_core::forecast::{predict_next_hour, ForecastRow, Forecaster};
use epfd_core::model::{ModelStore, Quantile};
use std::path::{Path, PathBuf};

const TS_HEADER: &str = "ts_utc";

#[derive(Debug, Clone)]
pub struct ForecastOutcome {
    pub rows: Vec<ForecastRow>,
    pub csv_path: PathBuf,
    /// Hours with at least one decreasing adjacent quantile pair.
    pub hours_with_crossings: usize,
}

pub fn run_forecast(config: &PipelineConfig) -> Result<ForecastOutcome, PipelineError> {
    let set = config.feature_set();
    let quantiles = config.quantiles()?;
    let calendar = config.calendar_context()?;
    let table = FeatureTable::new(&config.paths.feature_table);
    let history = table.recent(&set, config.forecast.history_days)?;

    let models = ModelStore::new(&config.paths.artifacts_dir).load_all(&quantiles, &set.input_names())?;
    let rows = Forecaster::new(&set, &calendar, &models, config.forecast.settings()).forecast(&history)?;

    let hours_with_crossings = rows.iter().filter(|r| !r.crossings().is_empty()).count();
    if hours_with_crossings > 0 {
        tracing::warn!(
            hours = hours_with_crossings,
            horizon = rows.len(),
            "calibration warning: quantile crossings in forecast"
        );
    }

    let csv_path = config.paths.forecast_csv.clone();
    write_forecast_csv(&csv_path, &rows, &quantiles)?;
    tracing::info!(rows = rows.len(), path = %csv_path.display(), "forecast written");

    Ok(ForecastOutcome {
        rows,
        csv_path,
        hours_with_crossings,
    })
}

/// Single-step prediction from the newest row of the feature table.
pub fn predict_latest(config: &PipelineConfig) -> Result<ForecastRow, PipelineError> {
    let set = config.feature_set();
    let table = FeatureTable::new(&config.paths.feature_table);
    let latest = table.latest_row(&set)?.ok_or_else(|| PipelineError::EmptyFeatureTable {
        path: table.path().to_path_buf(),
    })?;
    let models = ModelStore::new(&config.paths.artifacts_dir)
        .load_all(&config.quantiles()?, &set.input_names())?;
    Ok(predict_next_hour(&latest, &set, &models)?)
}

// ── CSV export ──────────────────────────────────────────────────────

/// `ts_utc,q05,...,q95`, one line per forecast hour.
pub fn write_forecast_csv(
    path: &Path,
    rows: &[ForecastRow],
    quantiles: &[Quantile],
) -> Result<(), PipelineError> {
    let io = |e: &dyn std::fmt::Display| PipelineError::Io(format!("forecast CSV {}: {e}", path.display()));
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io(&e))?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| io(&e))?;

    let mut header = vec![TS_HEADER.to_string()];
    header.extend(quantiles.iter().map(Quantile::id));
    wtr.write_record(&header).map_err(|e| io(&e))?;

    for row in rows {
        let mut record = vec![row.ts.to_rfc3339()];
        for q in quantiles {
            record.push(row.get(*q).map(|v| v.to_string()).unwrap_or_default());
        }
        wtr.write_record(&record).map_err(|e| io(&e))?;
    }
    wtr.flush().map_err(|e| io(&e))?;
    Ok(())
}

/// Read a fan written by `write_forecast_csv`.
pub fn read_forecast_csv(path: &Path) -> Result<Vec<ForecastRow>, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::MissingForecast {
            path: path.to_path_buf(),
        });
    }
    let bad = |detail: String| PipelineError::Io(format!("forecast CSV {}: {detail}", path.display()));
    let mut rdr = csv::Reader::from_path(path).map_err(|e| bad(e.to_string()))?;
    let headers = rdr.headers().map_err(|e| bad(e.to_string()))?.clone();
    if headers.get(0) != Some(TS_HEADER) {
        return Err(bad(format!("first column must be '{TS_HEADER}'")));
    }
    let quantiles = headers
        .iter()
        .skip(1)
        .map(|h| {
            h.strip_prefix('q')
                .and_then(|p| p.parse::<u8>().ok())
                .and_then(|p| Quantile::from_percent(p).ok())
                .ok_or_else(|| bad(format!("bad quantile column '{h}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| bad(e.to_string()))?;
        let raw_ts = record.get(0).unwrap_or_default();
        let ts = DateTime::parse_from_rfc3339(raw_ts)
            .map_err(|e| bad(format!("timestamp '{raw_ts}': {e}")))?
            .with_timezone(&Utc);
        let values = quantiles
            .iter()
            .zip(record.iter().skip(1))
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(q, cell)| {
                cell.parse::<f64>()
                    .map(|v| (*q, v))
                    .map_err(|e| bad(format!("value '{cell}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(ForecastRow { ts, values });
    }
    Ok(rows)
}
