//! Parquet feature table: the hand-off between feature building, training,
//! forecasting and the relational store.
//!
//! One row per hour, timestamps as `ts_utc_ms`. Derived columns follow the
//! `FeatureSet` descriptor order and are checked by name on read, so a
//! table built under a different feature layout is rejected instead of
//! silently misaligned.

use chrono::{DateTime, Duration, Utc};
use epfd_core::calendar::CalendarFields;
use epfd_core::domain::Quantity;
use epfd_core::features::{FeatureRow, FeatureSet};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TS_COL: &str = "ts_utc_ms";
const SHARE_COL: &str = "renewables_share";
const HOUR_COL: &str = "hour";
const DOW_COL: &str = "dow";
const WEEKEND_COL: &str = "is_weekend";
const HOLIDAY_COL: &str = "is_holiday";

#[derive(Debug, Error)]
pub enum FeatureTableError {
    #[error("feature table {path} not found; run `build-features` first")]
    Missing { path: PathBuf },

    #[error("feature table parquet error: {0}")]
    Parquet(String),

    #[error("feature table schema: {0}")]
    Schema(String),

    #[error("feature table I/O: {0}")]
    Io(String),
}

/// Sidecar written next to the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTableMeta {
    pub row_count: usize,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
    pub derived_columns: Vec<String>,
    pub data_hash: String,
    pub written_at: DateTime<Utc>,
}

pub struct FeatureTable {
    path: PathBuf,
}

impl FeatureTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn meta_path(&self) -> PathBuf {
        self.path.with_extension("meta.json")
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Replace the table with `rows` (atomic write).
    pub fn write(&self, rows: &[FeatureRow], set: &FeatureSet) -> Result<FeatureTableMeta, FeatureTableError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| FeatureTableError::Io(format!("create dir: {e}")))?;
        }
        let mut df = rows_to_dataframe(rows, set)?;
        let tmp = self.path.with_extension("parquet.tmp");
        let file = fs::File::create(&tmp).map_err(|e| FeatureTableError::Io(format!("create: {e}")))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| FeatureTableError::Parquet(format!("write: {e}")))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            FeatureTableError::Io(format!("atomic rename failed: {e}"))
        })?;

        let bytes = serde_json::to_vec(rows)
            .map_err(|e| FeatureTableError::Io(format!("hash serialization: {e}")))?;
        let meta = FeatureTableMeta {
            row_count: rows.len(),
            first_ts: rows.first().map(|r| r.ts),
            last_ts: rows.last().map(|r| r.ts),
            derived_columns: set.descriptors().iter().map(|d| d.column_name()).collect(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            written_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| FeatureTableError::Io(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(), json).map_err(|e| FeatureTableError::Io(format!("meta write: {e}")))?;
        Ok(meta)
    }

    pub fn meta(&self) -> Option<FeatureTableMeta> {
        let content = fs::read_to_string(self.meta_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// All rows, ascending by timestamp.
    pub fn read(&self, set: &FeatureSet) -> Result<Vec<FeatureRow>, FeatureTableError> {
        if !self.path.exists() {
            return Err(FeatureTableError::Missing {
                path: self.path.clone(),
            });
        }
        let file = fs::File::open(&self.path).map_err(|e| FeatureTableError::Io(format!("open: {e}")))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| FeatureTableError::Parquet(format!("read: {e}")))?;
        let mut rows = dataframe_to_rows(&df, set)?;
        rows.sort_by_key(|r| r.ts);
        Ok(rows)
    }

    /// Rows within the trailing `days` days of the latest row.
    pub fn recent(&self, set: &FeatureSet, days: i64) -> Result<Vec<FeatureRow>, FeatureTableError> {
        let rows = self.read(set)?;
        let Some(last) = rows.last().map(|r| r.ts) else {
            return Ok(rows);
        };
        let cutoff = last - Duration::days(days);
        Ok(rows.into_iter().filter(|r| r.ts > cutoff).collect())
    }

    pub fn latest_row(&self, set: &FeatureSet) -> Result<Option<FeatureRow>, FeatureTableError> {
        Ok(self.read(set)?.pop())
    }
}

// ── Conversion ──────────────────────────────────────────────────────

fn rows_to_dataframe(rows: &[FeatureRow], set: &FeatureSet) -> Result<DataFrame, FeatureTableError> {
    let f64_col = |name: &str, f: &dyn Fn(&FeatureRow) -> f64| {
        Column::new(name.into(), rows.iter().map(f).collect::<Vec<f64>>())
    };

    let mut columns = vec![
        Column::new(
            TS_COL.into(),
            rows.iter().map(|r| r.ts.timestamp_millis()).collect::<Vec<i64>>(),
        ),
        f64_col(Quantity::Price.column(), &|r| r.price),
        f64_col(Quantity::Load.column(), &|r| r.load),
        f64_col(Quantity::Wind.column(), &|r| r.wind),
        f64_col(Quantity::Solar.column(), &|r| r.solar),
        f64_col(SHARE_COL, &|r| r.renewables_share),
        Column::new(
            HOUR_COL.into(),
            rows.iter().map(|r| r.calendar.hour as i32).collect::<Vec<i32>>(),
        ),
        Column::new(
            DOW_COL.into(),
            rows.iter().map(|r| r.calendar.dow as i32).collect::<Vec<i32>>(),
        ),
        Column::new(
            WEEKEND_COL.into(),
            rows.iter().map(|r| r.calendar.is_weekend).collect::<Vec<bool>>(),
        ),
        Column::new(
            HOLIDAY_COL.into(),
            rows.iter().map(|r| r.calendar.is_holiday).collect::<Vec<bool>>(),
        ),
    ];
    for (i, d) in set.descriptors().iter().enumerate() {
        columns.push(Column::new(
            d.column_name().into(),
            rows.iter().map(|r| r.derived[i]).collect::<Vec<f64>>(),
        ));
    }
    DataFrame::new(columns).map_err(|e| FeatureTableError::Parquet(format!("dataframe creation: {e}")))
}

fn schema_err(name: &str, e: impl std::fmt::Display) -> FeatureTableError {
    FeatureTableError::Schema(format!("column '{name}': {e}"))
}

fn f64_column(df: &DataFrame, name: &str) -> Result<Float64Chunked, FeatureTableError> {
    df.column(name)
        .and_then(|c| c.f64().cloned())
        .map_err(|e| schema_err(name, e))
}

fn i32_column(df: &DataFrame, name: &str) -> Result<Int32Chunked, FeatureTableError> {
    df.column(name)
        .and_then(|c| c.i32().cloned())
        .map_err(|e| schema_err(name, e))
}

fn bool_column(df: &DataFrame, name: &str) -> Result<BooleanChunked, FeatureTableError> {
    df.column(name)
        .and_then(|c| c.bool().cloned())
        .map_err(|e| schema_err(name, e))
}

fn dataframe_to_rows(df: &DataFrame, set: &FeatureSet) -> Result<Vec<FeatureRow>, FeatureTableError> {
    let ts = df
        .column(TS_COL)
        .and_then(|c| c.i64().cloned())
        .map_err(|e| schema_err(TS_COL, e))?;
    let drivers = Quantity::ALL
        .iter()
        .map(|q| f64_column(df, q.column()))
        .collect::<Result<Vec<_>, _>>()?;
    let share = f64_column(df, SHARE_COL)?;
    let hour = i32_column(df, HOUR_COL)?;
    let dow = i32_column(df, DOW_COL)?;
    let weekend = bool_column(df, WEEKEND_COL)?;
    let holiday = bool_column(df, HOLIDAY_COL)?;
    let derived = set
        .descriptors()
        .iter()
        .map(|d| f64_column(df, &d.column_name()))
        .collect::<Result<Vec<_>, _>>()?;

    let null = |col: &str, i: usize| FeatureTableError::Schema(format!("null in '{col}' at row {i}"));

    (0..df.height())
        .map(|i| {
            let ms = ts.get(i).ok_or_else(|| null(TS_COL, i))?;
            let ts = DateTime::<Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| FeatureTableError::Schema(format!("timestamp out of range at row {i}")))?;
            let driver = |q: Quantity| drivers[q.index()].get(i).ok_or_else(|| null(q.column(), i));
            Ok(FeatureRow {
                ts,
                price: driver(Quantity::Price)?,
                load: driver(Quantity::Load)?,
                wind: driver(Quantity::Wind)?,
                solar: driver(Quantity::Solar)?,
                renewables_share: share.get(i).ok_or_else(|| null(SHARE_COL, i))?,
                calendar: CalendarFields {
                    hour: hour.get(i).ok_or_else(|| null(HOUR_COL, i))? as u32,
                    dow: dow.get(i).ok_or_else(|| null(DOW_COL, i))? as u32,
                    is_weekend: weekend.get(i).ok_or_else(|| null(WEEKEND_COL, i))?,
                    is_holiday: holiday.get(i).ok_or_else(|| null(HOLIDAY_COL, i))?,
                },
                derived: derived
                    .iter()
                    .zip(set.descriptors())
                    .map(|(col, d)| col.get(i).ok_or_else(|| null(&d.column_name(), i)))
                    .collect::<Result<Vec<_>, _>>()?,
            })
        })
        .collect()
}
