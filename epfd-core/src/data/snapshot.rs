//! Source snapshot store with Hive-style partitioning.
//!
//! Layout: `{raw_dir}/source={SOURCE}/{quantity}.parquet` for the hourly
//! view and `{quantity}_qh.parquet` for raw sub-hourly data.
//!
//! Features:
//! - Snapshots accumulate: each fetch is merged on top of the previous
//!   snapshot, newest fetch wins per timestamp
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (schema check)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per snapshot (hash, time range, point count)

use super::provider::{DataError, FetchResult};
use crate::domain::{Quantity, Source, SourceSeries, TimePoint};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const TS_COL: &str = "ts_utc_ms";
const VALUE_COL: &str = "value";

/// Metadata sidecar for one snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub source: Source,
    pub quantity: Quantity,
    pub raw: bool,
    pub first_ts: DateTime<Utc>,
    pub last_ts: DateTime<Utc>,
    pub point_count: usize,
    pub data_hash: String,
    pub written_at: DateTime<Utc>,
}

/// Outcome of merging one fetched series into its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotWrite {
    pub source: Source,
    pub quantity: Quantity,
    pub raw: bool,
    pub fetched: usize,
    pub before: usize,
    pub after: usize,
}

enum SnapshotRead {
    Missing,
    Loaded(SourceSeries),
    Quarantined(PathBuf),
}

pub struct SnapshotStore {
    raw_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
        }
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// `{raw_dir}/source={SOURCE}/`
    fn source_dir(&self, source: Source) -> PathBuf {
        self.raw_dir.join(format!("source={source}"))
    }

    fn stem(quantity: Quantity, raw: bool) -> String {
        if raw {
            format!("{}_qh", quantity.key())
        } else {
            quantity.key().to_string()
        }
    }

    fn data_path(&self, source: Source, quantity: Quantity, raw: bool) -> PathBuf {
        self.source_dir(source)
            .join(format!("{}.parquet", Self::stem(quantity, raw)))
    }

    fn meta_path(&self, source: Source, quantity: Quantity, raw: bool) -> PathBuf {
        self.source_dir(source)
            .join(format!("{}.meta.json", Self::stem(quantity, raw)))
    }

    fn quarantine_path(&self, source: Source, quantity: Quantity, raw: bool) -> PathBuf {
        self.data_path(source, quantity, raw)
            .with_extension("parquet.quarantined")
    }

    /// Hourly snapshot for a source/quantity. `Ok(None)` when nothing has
    /// been fetched yet; a corrupt or quarantined snapshot is an error.
    pub fn load(&self, source: Source, quantity: Quantity) -> Result<Option<SourceSeries>, DataError> {
        self.load_file(source, quantity, false)
    }

    /// Raw sub-hourly snapshot, if the source produced one.
    pub fn load_raw(
        &self,
        source: Source,
        quantity: Quantity,
    ) -> Result<Option<SourceSeries>, DataError> {
        self.load_file(source, quantity, true)
    }

    fn load_file(
        &self,
        source: Source,
        quantity: Quantity,
        raw: bool,
    ) -> Result<Option<SourceSeries>, DataError> {
        match self.read_snapshot(source, quantity, raw)? {
            SnapshotRead::Missing => Ok(None),
            SnapshotRead::Loaded(series) => Ok(Some(series)),
            SnapshotRead::Quarantined(path) => Err(DataError::SnapshotError(format!(
                "{source}/{quantity} snapshot is corrupt (quarantined at {}); re-fetch {source}",
                path.display()
            ))),
        }
    }

    /// Read a snapshot, moving a corrupt file aside. A quarantined file
    /// with no live replacement stays reported as quarantined.
    fn read_snapshot(
        &self,
        source: Source,
        quantity: Quantity,
        raw: bool,
    ) -> Result<SnapshotRead, DataError> {
        let path = self.data_path(source, quantity, raw);
        let quarantine = self.quarantine_path(source, quantity, raw);
        if !path.exists() {
            return Ok(if quarantine.exists() {
                SnapshotRead::Quarantined(quarantine)
            } else {
                SnapshotRead::Missing
            });
        }
        match load_and_validate_parquet(&path) {
            Ok(points) => Ok(SnapshotRead::Loaded(SourceSeries::from_points(
                source, quantity, points,
            ))),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "quarantining corrupt snapshot"
                );
                fs::rename(&path, &quarantine)
                    .map_err(|e| DataError::SnapshotError(format!("quarantine rename: {e}")))?;
                Ok(SnapshotRead::Quarantined(quarantine))
            }
        }
    }

    /// Merge `series` on top of the existing snapshot and write it back.
    ///
    /// An empty fetch with no prior snapshot writes nothing. A corrupt
    /// prior snapshot stays quarantined and the fetched series starts a
    /// fresh one.
    pub fn merge_and_write(
        &self,
        series: &SourceSeries,
        raw: bool,
    ) -> Result<SnapshotWrite, DataError> {
        let prior = match self.read_snapshot(series.source, series.quantity, raw)? {
            SnapshotRead::Loaded(old) => Some(old),
            SnapshotRead::Missing => None,
            SnapshotRead::Quarantined(path) => {
                tracing::warn!(
                    source = %series.source,
                    quantity = %series.quantity,
                    quarantined = %path.display(),
                    "rebuilding snapshot from this fetch only"
                );
                None
            }
        };
        let before = prior.as_ref().map_or(0, |s| s.len());
        let merged = match prior {
            Some(old) => old.merge_newer(series),
            None => series.clone(),
        };

        let outcome = SnapshotWrite {
            source: series.source,
            quantity: series.quantity,
            raw,
            fetched: series.len(),
            before,
            after: merged.len(),
        };
        if merged.is_empty() {
            return Ok(outcome);
        }

        let dir = self.source_dir(series.source);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::SnapshotError(format!("failed to create dir: {e}")))?;

        let path = self.data_path(series.source, series.quantity, raw);
        let tmp_path = path.with_extension("parquet.tmp");
        let df = points_to_dataframe(merged.points())?;
        write_parquet(&df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::SnapshotError(format!("atomic rename failed: {e}"))
        })?;

        self.write_meta(&merged, raw)?;
        Ok(outcome)
    }

    fn write_meta(&self, merged: &SourceSeries, raw: bool) -> Result<(), DataError> {
        let (Some(first_ts), Some(last_ts)) = (merged.first_ts(), merged.last_ts()) else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(merged.points())
            .map_err(|e| DataError::SnapshotError(format!("hash serialization: {e}")))?;
        let meta = SnapshotMeta {
            source: merged.source,
            quantity: merged.quantity,
            raw,
            first_ts,
            last_ts,
            point_count: merged.len(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            written_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::SnapshotError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(merged.source, merged.quantity, raw), json)
            .map_err(|e| DataError::SnapshotError(format!("meta write: {e}")))
    }

    /// Persist a whole fetch result: hourly series and raw series.
    pub fn persist(&self, result: &FetchResult) -> Result<Vec<SnapshotWrite>, DataError> {
        let mut writes = Vec::with_capacity(result.hourly.len() + result.raw.len());
        for s in &result.hourly {
            writes.push(self.merge_and_write(s, false)?);
        }
        for s in &result.raw {
            writes.push(self.merge_and_write(s, true)?);
        }
        Ok(writes)
    }

    pub fn get_meta(&self, source: Source, quantity: Quantity, raw: bool) -> Option<SnapshotMeta> {
        let content = fs::read_to_string(self.meta_path(source, quantity, raw)).ok()?;
        serde_json::from_str(&content).ok()
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn points_to_dataframe(points: &[TimePoint]) -> Result<DataFrame, DataError> {
    let ts: Vec<i64> = points.iter().map(|p| p.ts.timestamp_millis()).collect();
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    DataFrame::new(vec![
        Column::new(TS_COL.into(), ts),
        Column::new(VALUE_COL.into(), values),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<TimePoint>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    let ts = df
        .column(TS_COL)
        .and_then(|c| c.i64().cloned())
        .map_err(|e| DataError::ValidationError(format!("column '{TS_COL}': {e}")))?;
    let values = df
        .column(VALUE_COL)
        .and_then(|c| c.f64().cloned())
        .map_err(|e| DataError::ValidationError(format!("column '{VALUE_COL}': {e}")))?;

    let mut points = Vec::with_capacity(df.height());
    for (i, (ms, v)) in (&ts).into_iter().zip(&values).enumerate() {
        let ms = ms.ok_or_else(|| DataError::ValidationError(format!("null timestamp at row {i}")))?;
        let ts = DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| DataError::ValidationError(format!("timestamp out of range at row {i}")))?;
        if let Some(v) = v {
            points.push(TimePoint::new(ts, v));
        }
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()
    }

    fn series(values: &[(u32, f64)]) -> SourceSeries {
        SourceSeries::from_points(
            Source::Entsoe,
            Quantity::Price,
            values.iter().map(|&(h, v)| TimePoint::new(t(h), v)),
        )
    }

    #[test]
    fn absent_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.load(Source::Opsd, Quantity::Load).unwrap().is_none());
    }

    #[test]
    fn repeated_fetches_accumulate_and_newest_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        store.merge_and_write(&series(&[(0, 1.0), (1, 2.0)]), false).unwrap();
        let w = store
            .merge_and_write(&series(&[(1, 20.0), (2, 3.0)]), false)
            .unwrap();
        assert_eq!((w.before, w.after), (2, 3));

        let loaded = store.load(Source::Entsoe, Quantity::Price).unwrap().unwrap();
        let values: Vec<f64> = loaded.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 20.0, 3.0]);

        let meta = store.get_meta(Source::Entsoe, Quantity::Price, false).unwrap();
        assert_eq!(meta.point_count, 3);
        assert_eq!(meta.first_ts, t(0));
        assert_eq!(meta.last_ts, t(2));
    }

    #[test]
    fn raw_and_hourly_are_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.merge_and_write(&series(&[(0, 1.0)]), true).unwrap();
        assert!(store.load(Source::Entsoe, Quantity::Price).unwrap().is_none());
        assert_eq!(
            store
                .load_raw(Source::Entsoe, Quantity::Price)
                .unwrap()
                .unwrap()
                .len(),
            1
        );
        assert!(dir.path().join("source=entsoe").join("price_qh.parquet").exists());
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let src_dir = dir.path().join("source=smard");
        fs::create_dir_all(&src_dir).unwrap();
        fs::write(src_dir.join("load.parquet"), b"not a parquet file").unwrap();

        match store.load(Source::Smard, Quantity::Load) {
            Err(DataError::SnapshotError(msg)) => assert!(msg.contains("quarantined")),
            other => panic!("expected snapshot error, got {other:?}"),
        }
        assert!(src_dir.join("load.parquet.quarantined").exists());
        assert!(!src_dir.join("load.parquet").exists());

        // Still an error on the next read, not an absent snapshot.
        assert!(store.load(Source::Smard, Quantity::Load).is_err());
    }

    #[test]
    fn fetch_after_quarantine_starts_fresh_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let src_dir = dir.path().join("source=entsoe");
        fs::create_dir_all(&src_dir).unwrap();
        fs::write(src_dir.join("price.parquet"), b"garbage").unwrap();

        let w = store.merge_and_write(&series(&[(3, 7.0)]), false).unwrap();
        assert_eq!((w.before, w.after), (0, 1));
        assert!(src_dir.join("price.parquet.quarantined").exists());
        let loaded = store.load(Source::Entsoe, Quantity::Price).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn empty_fetch_without_prior_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let w = store
            .merge_and_write(&SourceSeries::empty(Source::Opsd, Quantity::Wind), false)
            .unwrap();
        assert_eq!(w.after, 0);
        assert!(!dir.path().join("source=opsd").exists());
    }
}
