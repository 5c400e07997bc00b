//! Relational store (SQLite): feature and prediction tables, data-quality
//! checks and the serving reads.
//!
//! Timestamps are stored as `YYYY-MM-DDTHH:MM:SSZ` text so lexical order
//! is chronological order. Both tables upsert by `ts_utc`.

use chrono::{DateTime, Duration, Utc};
use epfd_core::features::FeatureRow;
use epfd_core::forecast::ForecastRow;
use epfd_core::model::Quantile;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store I/O: {0}")]
    Io(String),

    #[error("forecast for {ts} has no median (q50) value")]
    MissingMedian { ts: DateTime<Utc> },

    #[error("serialization: {0}")]
    Serialization(String),
}

/// Persisted feature row (raw drivers and calendar flags only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFeature {
    pub ts_utc: DateTime<Utc>,
    pub price_eur_mwh: f64,
    pub load_mw: f64,
    pub wind_mw: f64,
    pub solar_mw: f64,
    pub renewables_share: f64,
    pub hour: u32,
    pub dow: u32,
    pub is_weekend: bool,
    pub is_holiday: bool,
}

/// Persisted forecast hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrediction {
    pub ts_utc: DateTime<Utc>,
    pub y_p10: Option<f64>,
    pub y_p50: f64,
    pub y_p90: Option<f64>,
    /// Every quantile of the run, keyed by id (`q05`, ...).
    pub fan: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of the data-quality checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub window_start: DateTime<Utc>,
    pub recent_rows: i64,
    pub duplicate_timestamps: i64,
}

impl QualityReport {
    /// Human-readable failures; empty when healthy.
    pub fn failures(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.recent_rows <= 0 {
            out.push(format!(
                "no feature rows since {}",
                self.window_start.format(TS_FORMAT)
            ));
        }
        if self.duplicate_timestamps != 0 {
            out.push(format!("{} duplicate timestamps", self.duplicate_timestamps));
        }
        out
    }

    pub fn passed(&self) -> bool {
        self.failures().is_empty()
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    // ========== Migrations ==========

    /// Apply pending migrations; returns the names applied by this call.
    pub fn migrate(&self) -> Result<Vec<&'static str>, StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS migrations (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let mut applied = Vec::new();
        for (name, sql) in MIGRATIONS {
            if self.run_migration(name, sql)? {
                applied.push(*name);
            }
        }
        tracing::info!(applied = applied.len(), "database migrations completed");
        Ok(applied)
    }

    fn run_migration(&self, name: &str, sql: &str) -> Result<bool, StoreError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
            [name],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(false);
        }
        tracing::info!("Running migration: {}", name);
        self.conn.execute_batch(sql)?;
        self.conn
            .execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
        Ok(true)
    }

    // ========== Features ==========

    /// Insert or overwrite feature rows by timestamp.
    pub fn upsert_features(&mut self, rows: &[FeatureRow]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO features_hourly
                   (ts_utc, price_eur_mwh, load_mw, wind_mw, solar_mw,
                    renewables_share, hour, dow, is_weekend, is_holiday)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (ts_utc) DO UPDATE SET
                   price_eur_mwh = excluded.price_eur_mwh,
                   load_mw = excluded.load_mw,
                   wind_mw = excluded.wind_mw,
                   solar_mw = excluded.solar_mw,
                   renewables_share = excluded.renewables_share,
                   hour = excluded.hour,
                   dow = excluded.dow,
                   is_weekend = excluded.is_weekend,
                   is_holiday = excluded.is_holiday",
            )?;
            for r in rows {
                stmt.execute(params![
                    fmt_ts(r.ts),
                    r.price,
                    r.load,
                    r.wind,
                    r.solar,
                    r.renewables_share,
                    r.calendar.hour,
                    r.calendar.dow,
                    r.calendar.is_weekend,
                    r.calendar.is_holiday,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn feature_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM features_hourly", [], |row| row.get(0))?)
    }

    /// Most recent stored feature row.
    pub fn latest_feature(&self) -> Result<Option<StoredFeature>, StoreError> {
        let feature = self
            .conn
            .query_row(
                "SELECT ts_utc, price_eur_mwh, load_mw, wind_mw, solar_mw,
                        renewables_share, hour, dow, is_weekend, is_holiday
                 FROM features_hourly
                 ORDER BY ts_utc DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok(StoredFeature {
                        ts_utc: ts_column(row, 0)?,
                        price_eur_mwh: row.get(1)?,
                        load_mw: row.get(2)?,
                        wind_mw: row.get(3)?,
                        solar_mw: row.get(4)?,
                        renewables_share: row.get(5)?,
                        hour: row.get(6)?,
                        dow: row.get(7)?,
                        is_weekend: row.get(8)?,
                        is_holiday: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(feature)
    }

    // ========== Predictions ==========

    /// Insert or overwrite forecast hours by timestamp; `created_at` is
    /// refreshed on every write.
    pub fn upsert_predictions(&mut self, rows: &[ForecastRow]) -> Result<usize, StoreError> {
        let p10 = Quantile::from_percent(10).ok();
        let p90 = Quantile::from_percent(90).ok();
        let now = fmt_ts(Utc::now());

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO predictions_hourly (ts_utc, y_p50, y_p10, y_p90, fan_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (ts_utc) DO UPDATE SET
                   y_p50 = excluded.y_p50,
                   y_p10 = excluded.y_p10,
                   y_p90 = excluded.y_p90,
                   fan_json = excluded.fan_json,
                   created_at = excluded.created_at",
            )?;
            for r in rows {
                let median = r.median().ok_or(StoreError::MissingMedian { ts: r.ts })?;
                let fan: BTreeMap<String, f64> = r.values.iter().map(|(q, v)| (q.id(), *v)).collect();
                let fan_json = serde_json::to_string(&fan)
                    .map_err(|e| StoreError::Serialization(format!("fan: {e}")))?;
                stmt.execute(params![
                    fmt_ts(r.ts),
                    median,
                    p10.and_then(|q| r.get(q)),
                    p90.and_then(|q| r.get(q)),
                    fan_json,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn prediction_count(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM predictions_hourly", [], |row| row.get(0))?)
    }

    /// The next `hours` stored forecasts at or after `now`, ascending.
    pub fn next_predictions(
        &self,
        now: DateTime<Utc>,
        hours: u32,
    ) -> Result<Vec<StoredPrediction>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT ts_utc, y_p10, y_p50, y_p90, fan_json, created_at
             FROM predictions_hourly
             WHERE ts_utc >= ?1
             ORDER BY ts_utc ASC
             LIMIT ?2",
        )?;
        let predictions = stmt
            .query_map(params![fmt_ts(now), hours], |row| {
                let fan_json: String = row.get(4)?;
                Ok(StoredPrediction {
                    ts_utc: ts_column(row, 0)?,
                    y_p10: row.get(1)?,
                    y_p50: row.get(2)?,
                    y_p90: row.get(3)?,
                    fan: serde_json::from_str(&fan_json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
                    })?,
                    created_at: ts_column(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(predictions)
    }

    // ========== Data quality ==========

    /// Rows in the trailing two days must exist; timestamps must be unique.
    pub fn check_quality(&self, now: DateTime<Utc>) -> Result<QualityReport, StoreError> {
        let window_start = now - Duration::days(2);
        let recent_rows: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM features_hourly WHERE ts_utc >= ?1",
            [fmt_ts(window_start)],
            |row| row.get(0),
        )?;
        let duplicate_timestamps: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM (
                SELECT ts_utc FROM features_hourly GROUP BY ts_utc HAVING COUNT(*) > 1
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(QualityReport {
            window_start,
            recent_rows,
            duplicate_timestamps,
        })
    }
}

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_features_hourly", CREATE_FEATURES_TABLE),
    ("002_predictions_hourly", CREATE_PREDICTIONS_TABLE),
    ("003_features_is_holiday", ADD_FEATURES_IS_HOLIDAY),
];

const CREATE_FEATURES_TABLE: &str = r#"
CREATE TABLE features_hourly (
    ts_utc TEXT PRIMARY KEY,
    price_eur_mwh REAL,
    load_mw REAL,
    wind_mw REAL,
    solar_mw REAL,
    renewables_share REAL,
    hour INTEGER,
    dow INTEGER,
    is_weekend INTEGER
);
"#;

const CREATE_PREDICTIONS_TABLE: &str = r#"
CREATE TABLE predictions_hourly (
    ts_utc TEXT PRIMARY KEY,
    y_p50 REAL NOT NULL,
    y_p10 REAL,
    y_p90 REAL,
    fan_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);
"#;

const ADD_FEATURES_IS_HOLIDAY: &str = r#"
ALTER TABLE features_hourly ADD COLUMN is_holiday INTEGER NOT NULL DEFAULT 0;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use epfd_core::calendar::CalendarContext;

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn feature(h: i64, price: f64) -> FeatureRow {
        FeatureRow {
            ts: t(h),
            price,
            load: 45_000.0,
            wind: 9_000.0,
            solar: 12_000.0,
            renewables_share: 21_000.0 / 45_000.0,
            calendar: CalendarContext::germany().fields(t(h)),
            derived: vec![],
        }
    }

    fn fan(h: i64, mid: f64) -> ForecastRow {
        let q = |p| Quantile::from_percent(p).unwrap();
        ForecastRow {
            ts: t(h),
            values: vec![(q(10), mid - 10.0), (q(50), mid), (q(90), mid + 10.0)],
        }
    }

    fn store() -> Store {
        let s = Store::open_in_memory().unwrap();
        s.migrate().unwrap();
        s
    }

    #[test]
    fn migrations_apply_once() {
        let s = Store::open_in_memory().unwrap();
        assert_eq!(s.migrate().unwrap().len(), 3);
        assert!(s.migrate().unwrap().is_empty());
    }

    #[test]
    fn feature_upsert_overwrites_by_timestamp() {
        let mut s = store();
        s.upsert_features(&[feature(0, 10.0), feature(1, 12.0)]).unwrap();
        s.upsert_features(&[feature(1, 99.0), feature(2, 11.0)]).unwrap();
        assert_eq!(s.feature_count().unwrap(), 3);

        let latest = s.latest_feature().unwrap().unwrap();
        assert_eq!(latest.ts_utc, t(2));
        assert_eq!(latest.price_eur_mwh, 11.0);
    }

    #[test]
    fn latest_feature_of_empty_table_is_none() {
        assert!(store().latest_feature().unwrap().is_none());
    }

    #[test]
    fn prediction_upsert_is_idempotent() {
        let mut s = store();
        let rows = vec![fan(0, 50.0), fan(1, 55.0)];
        s.upsert_predictions(&rows).unwrap();
        let first = s.next_predictions(t(0), 24).unwrap();
        s.upsert_predictions(&rows).unwrap();
        let second = s.next_predictions(t(0), 24).unwrap();

        assert_eq!(s.prediction_count().unwrap(), 2);
        let strip = |v: &[StoredPrediction]| {
            v.iter()
                .map(|p| (p.ts_utc, p.y_p10, p.y_p50, p.y_p90, p.fan.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&first), strip(&second));
        assert_eq!(first[0].fan.get("q90"), Some(&60.0));
    }

    #[test]
    fn next_predictions_start_at_now_ascending() {
        let mut s = store();
        s.upsert_predictions(&(0..30).map(|h| fan(h, h as f64)).collect::<Vec<_>>())
            .unwrap();
        let next = s.next_predictions(t(5), 24).unwrap();
        assert_eq!(next.len(), 24);
        assert_eq!(next[0].ts_utc, t(5));
        assert!(next.windows(2).all(|w| w[0].ts_utc < w[1].ts_utc));
        assert_eq!(s.next_predictions(t(28), 24).unwrap().len(), 2);
    }

    #[test]
    fn forecast_without_median_is_rejected() {
        let mut s = store();
        let row = ForecastRow {
            ts: t(0),
            values: vec![(Quantile::from_percent(10).unwrap(), 1.0)],
        };
        assert!(matches!(
            s.upsert_predictions(&[row]),
            Err(StoreError::MissingMedian { .. })
        ));
    }

    #[test]
    fn quality_checks() {
        let mut s = store();
        let empty = s.check_quality(t(10)).unwrap();
        assert!(!empty.passed());

        s.upsert_features(&[feature(0, 1.0), feature(9, 2.0)]).unwrap();
        let report = s.check_quality(t(10)).unwrap();
        assert_eq!(report.recent_rows, 2);
        assert_eq!(report.duplicate_timestamps, 0);
        assert!(report.passed());

        let stale = s.check_quality(t(24 * 7)).unwrap();
        assert_eq!(stale.failures().len(), 1);
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db/epfd.sqlite");
        {
            let mut s = Store::open(&path).unwrap();
            s.migrate().unwrap();
            s.upsert_features(&[feature(0, 3.0)]).unwrap();
        }
        let s = Store::open(&path).unwrap();
        assert!(s.migrate().unwrap().is_empty());
        assert_eq!(s.feature_count().unwrap(), 1);
    }
}
