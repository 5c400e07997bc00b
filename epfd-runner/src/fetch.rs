//! Fetch stage: run one source fetcher for a window and merge its output
//! into the snapshot store.

use crate::config::PipelineConfig;
use crate::pipeline::PipelineError;
use chrono::{DateTime, Duration, Utc};
use epfd_core::data::{
    build_client, EntsoeFetcher, FetchWindow, OpsdFetcher, SmardFetcher, SnapshotStore,
    SnapshotWrite, SourceFetcher,
};
use epfd_core::domain::{floor_to_hour, Resolution, Source};

/// Options for one fetch invocation.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Overrides the configured SMARD resolution.
    pub resolution: Option<Resolution>,
    /// Caps an open start at this many years before the end.
    pub limit_years: Option<u32>,
}

impl FetchOptions {
    /// Concrete window. Open ends stay open unless `limit_years` forces a
    /// start, in which case the end defaults to the current hour.
    pub fn window(&self, now: DateTime<Utc>) -> FetchWindow {
        let Some(years) = self.limit_years else {
            return FetchWindow::new(self.start, self.end);
        };
        let end = self.end.unwrap_or_else(|| floor_to_hour(now));
        let floor = end - Duration::days(365 * i64::from(years));
        let start = self.start.map_or(floor, |s| s.max(floor));
        FetchWindow::new(Some(start), Some(end))
    }
}

/// Summary of one source fetch.
#[derive(Debug, Clone)]
pub struct FetchSummary {
    pub source: Source,
    pub window: FetchWindow,
    /// Hourly points returned across all quantities.
    pub points: usize,
    pub writes: Vec<SnapshotWrite>,
}

impl FetchSummary {
    /// Rows added to snapshots by this fetch (hourly views only).
    pub fn rows_added(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| !w.raw)
            .map(|w| w.after.saturating_sub(w.before))
            .sum()
    }
}

/// Construct the fetcher for `source` from configuration.
pub fn build_fetcher(
    config: &PipelineConfig,
    source: Source,
    resolution: Option<Resolution>,
) -> Result<Box<dyn SourceFetcher>, PipelineError> {
    let client = build_client(config.http.timeout())?;
    let fetcher: Box<dyn SourceFetcher> = match source {
        Source::Smard => {
            let mut settings = config.sources.smard.clone();
            if let Some(r) = resolution {
                settings.resolution = r;
            }
            Box::new(SmardFetcher::new(client, settings))
        }
        Source::Opsd => Box::new(OpsdFetcher::new(client, config.sources.opsd.clone())),
        Source::Entsoe => Box::new(EntsoeFetcher::from_env(client, config.sources.entsoe.clone())?),
    };
    Ok(fetcher)
}

/// Fetch, then merge into snapshots. Nothing is written when the fetch
/// fails.
pub fn fetch_into(
    fetcher: &dyn SourceFetcher,
    snapshots: &SnapshotStore,
    window: FetchWindow,
) -> Result<FetchSummary, PipelineError> {
    let source = fetcher.source();
    tracing::info!(%source, start = ?window.start, end = ?window.end, "fetching");
    let result = fetcher.fetch(&window)?;
    let points = result.total_points();
    if points == 0 {
        tracing::warn!(%source, "fetch returned no data for the window");
    }
    let writes = snapshots.persist(&result)?;
    for w in &writes {
        tracing::info!(
            source = %w.source,
            quantity = %w.quantity,
            raw = w.raw,
            fetched = w.fetched,
            before = w.before,
            after = w.after,
            "snapshot merged"
        );
    }
    Ok(FetchSummary {
        source,
        window,
        points,
        writes,
    })
}

pub fn run_fetch(
    config: &PipelineConfig,
    source: Source,
    opts: &FetchOptions,
) -> Result<FetchSummary, PipelineError> {
    let fetcher = build_fetcher(config, source, opts.resolution)?;
    let snapshots = SnapshotStore::new(&config.paths.raw_dir);
    fetch_into(fetcher.as_ref(), &snapshots, opts.window(Utc::now()))
}
