//! SMARD grid-operator fetcher (load, wind, solar).
//!
//! SMARD publishes each series as a chunk index plus one JSON file per
//! chunk:
//! - `{base}/{filter}/{region}/index_{resolution}.json` lists chunk start
//!   times (epoch ms) under `timestamps` or `availableTimestamps`
//! - `{base}/{filter}/{region}/{filter}_{region}_{resolution}_{ts}.json`
//!   holds `[epoch_ms, value | null]` rows under `series` or `data`
//!
//! Wind is published as separate onshore and offshore series and summed
//! here. Quarter-hour data is exposed raw and as an hourly mean view.

use super::http::get_text;
use super::provider::{DataError, FetchResult, FetchWindow, SourceFetcher};
use crate::domain::{Quantity, Resolution, Source, SourceSeries, TimePoint};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const SMARD_BASE_URL: &str = "https://www.smard.de/app/chart_data";

/// SMARD filter ids for the series we consume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmardSeriesIds {
    pub load_actual: u32,
    pub wind_onshore: u32,
    pub wind_offshore: u32,
    pub solar_pv: u32,
}

impl Default for SmardSeriesIds {
    fn default() -> Self {
        Self {
            load_actual: 410,
            wind_onshore: 4067,
            wind_offshore: 1225,
            solar_pv: 4068,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmardSettings {
    pub base_url: String,
    pub region: String,
    pub resolution: Resolution,
    pub series: SmardSeriesIds,
}

impl Default for SmardSettings {
    fn default() -> Self {
        Self {
            base_url: SMARD_BASE_URL.to_string(),
            region: "DE".to_string(),
            resolution: Resolution::Hour,
            series: SmardSeriesIds::default(),
        }
    }
}

pub struct SmardFetcher {
    client: Client,
    settings: SmardSettings,
}

impl SmardFetcher {
    pub fn new(client: Client, settings: SmardSettings) -> Self {
        Self { client, settings }
    }

    fn resolution_token(&self) -> &'static str {
        match self.settings.resolution {
            Resolution::QuarterHour => "quarterhour",
            Resolution::Hour => "hour",
        }
    }

    fn index_url(&self, filter: u32) -> String {
        format!(
            "{}/{filter}/{}/index_{}.json",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.region,
            self.resolution_token()
        )
    }

    fn chunk_url(&self, filter: u32, chunk_ts: i64) -> String {
        let region = &self.settings.region;
        format!(
            "{}/{filter}/{region}/{filter}_{region}_{}_{chunk_ts}.json",
            self.settings.base_url.trim_end_matches('/'),
            self.resolution_token()
        )
    }

    fn fetch_index(&self, filter: u32) -> Result<Vec<i64>, DataError> {
        let url = self.index_url(filter);
        let body = get_text(&self.client, Source::Smard, &url, &[])?;
        parse_index(&body).map_err(|detail| DataError::schema(Source::Smard, format!("{url}: {detail}")))
    }

    fn fetch_chunk(&self, filter: u32, chunk_ts: i64) -> Result<Vec<TimePoint>, DataError> {
        let url = self.chunk_url(filter, chunk_ts);
        let body = get_text(&self.client, Source::Smard, &url, &[])?;
        parse_chunk(&body).map_err(|detail| DataError::schema(Source::Smard, format!("{url}: {detail}")))
    }

    /// All points of one filter inside the window, at native resolution.
    fn fetch_filter(
        &self,
        filter: u32,
        quantity: Quantity,
        window: &FetchWindow,
    ) -> Result<SourceSeries, DataError> {
        let index = self.fetch_index(filter)?;
        let mut points = Vec::new();
        for chunk_ts in select_chunks(&index, window) {
            points.extend(self.fetch_chunk(filter, chunk_ts)?);
        }
        let series = SourceSeries::from_points(Source::Smard, quantity, points);
        tracing::debug!(filter, %quantity, points = series.len(), "fetched SMARD series");
        Ok(series.clip(window.start, window.end))
    }
}

impl SourceFetcher for SmardFetcher {
    fn source(&self) -> Source {
        Source::Smard
    }

    fn quantities(&self) -> &[Quantity] {
        &[Quantity::Load, Quantity::Wind, Quantity::Solar]
    }

    fn fetch(&self, window: &FetchWindow) -> Result<FetchResult, DataError> {
        let ids = &self.settings.series;
        let load = self.fetch_filter(ids.load_actual, Quantity::Load, window)?;
        let wind_on = self.fetch_filter(ids.wind_onshore, Quantity::Wind, window)?;
        let wind_off = self.fetch_filter(ids.wind_offshore, Quantity::Wind, window)?;
        let solar = self.fetch_filter(ids.solar_pv, Quantity::Solar, window)?;

        let hourly = vec![
            load.hourly_mean(),
            sum_series(&wind_on.hourly_mean(), &wind_off.hourly_mean()),
            solar.hourly_mean(),
        ];
        let raw = match self.settings.resolution {
            Resolution::QuarterHour => vec![load, sum_series(&wind_on, &wind_off), solar],
            Resolution::Hour => Vec::new(),
        };

        Ok(FetchResult {
            source: Source::Smard,
            hourly,
            raw,
        })
    }
}

// ── Payload parsing ─────────────────────────────────────────────────

fn parse_index(body: &str) -> Result<Vec<i64>, String> {
    let payload: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let list = payload
        .get("timestamps")
        .or_else(|| payload.get("availableTimestamps"))
        .and_then(Value::as_array)
        .ok_or_else(|| format!("index lacks 'timestamps': keys={}", keys_of(&payload)))?;
    let mut out = list
        .iter()
        .map(|v| v.as_i64().ok_or_else(|| format!("non-integer chunk timestamp {v}")))
        .collect::<Result<Vec<_>, _>>()?;
    out.sort_unstable();
    Ok(out)
}

fn parse_chunk(body: &str) -> Result<Vec<TimePoint>, String> {
    let payload: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let rows = payload
        .get("series")
        .or_else(|| payload.get("data"))
        .and_then(Value::as_array)
        .ok_or_else(|| format!("chunk lacks 'series': keys={}", keys_of(&payload)))?;

    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let pair = row
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| format!("malformed row {row}"))?;
        let ms = pair[0]
            .as_i64()
            .ok_or_else(|| format!("non-integer timestamp {}", pair[0]))?;
        let ts = DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| format!("timestamp out of range: {ms}"))?;
        // null marks a not-yet-published slot
        if let Some(value) = pair[1].as_f64() {
            points.push(TimePoint::new(ts, value));
        }
    }
    Ok(points)
}

fn keys_of(v: &Value) -> String {
    v.as_object()
        .map(|o| o.keys().cloned().collect::<Vec<_>>().join(","))
        .unwrap_or_else(|| "<not an object>".into())
}

/// Chunks overlapping the window: every chunk starting inside it, plus the
/// last chunk starting before `start` (it covers the window's head).
fn select_chunks(index: &[i64], window: &FetchWindow) -> Vec<i64> {
    let start_ms = window.start.map(|s| s.timestamp_millis());
    let end_ms = window.end.map(|e| e.timestamp_millis());

    let head = start_ms.and_then(|s| index.iter().copied().filter(|&t| t < s).max());
    head.into_iter()
        .chain(
            index
                .iter()
                .copied()
                .filter(|&t| start_ms.map_or(true, |s| t >= s))
                .filter(|&t| end_ms.map_or(true, |e| t < e)),
        )
        .collect()
}

/// Per-timestamp sum where a side missing counts as zero.
fn sum_series(a: &SourceSeries, b: &SourceSeries) -> SourceSeries {
    let mut acc: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    for p in a.points().iter().chain(b.points()) {
        *acc.entry(p.ts).or_insert(0.0) += p.value;
    }
    SourceSeries::from_points(
        a.source,
        a.quantity,
        acc.into_iter().map(|(ts, v)| TimePoint::new(ts, v)),
    )
}
