//! Source fetcher trait and structured error types.
//!
//! The SourceFetcher trait abstracts over upstream feeds (SMARD, OPSD,
//! ENTSO-E) so the fetch stage can drive them uniformly and tests can swap
//! in local mock servers.

use crate::domain::{Quantity, Source, SourceSeries};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Structured error types for fetch and snapshot operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("{feed} returned HTTP {status} for {url}")]
    Http {
        feed: Source,
        status: u16,
        url: String,
    },

    #[error("upstream schema changed ({feed}): {detail}")]
    UpstreamSchema { feed: Source, detail: String },

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("snapshot error: {0}")]
    SnapshotError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

impl DataError {
    pub(crate) fn schema(feed: Source, detail: impl Into<String>) -> Self {
        DataError::UpstreamSchema {
            feed,
            detail: detail.into(),
        }
    }
}

/// Optional half-open `[start, end)` UTC window for a fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl FetchWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// The `days` days ending at `end`.
    pub fn trailing_days(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: Some(end - Duration::days(days)),
            end: Some(end),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }
}

/// Result of one fetch: an hourly series per quantity, plus the raw
/// finer-grained series for sources sampled below one hour.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub source: Source,
    pub hourly: Vec<SourceSeries>,
    pub raw: Vec<SourceSeries>,
}

impl FetchResult {
    pub fn total_points(&self) -> usize {
        self.hourly.iter().map(|s| s.len()).sum()
    }

    pub fn series(&self, quantity: Quantity) -> Option<&SourceSeries> {
        self.hourly.iter().find(|s| s.quantity == quantity)
    }
}

/// Trait for upstream feeds.
///
/// Implementations normalise their payloads to UTC `SourceSeries` and fail
/// with `UpstreamSchema` before returning anything when the payload does
/// not look as expected. Persistence sits above this trait.
pub trait SourceFetcher: Send + Sync {
    fn source(&self) -> Source;

    /// Quantities this source provides.
    fn quantities(&self) -> &[Quantity];

    fn fetch(&self, window: &FetchWindow) -> Result<FetchResult, DataError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let w = FetchWindow::new(Some(start), Some(end));
        assert!(w.contains(start));
        assert!(!w.contains(end));
        assert!(FetchWindow::default().contains(end));
    }

    #[test]
    fn trailing_days_spans_window() {
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let w = FetchWindow::trailing_days(end, 30);
        assert_eq!(w.start, Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()));
        assert_eq!(w.end, Some(end));
    }
}
