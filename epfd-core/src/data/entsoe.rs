//! ENTSO-E transparency platform fetcher: day-ahead auction prices (A44).
//!
//! The API answers with a `Publication_MarketDocument`; each `TimeSeries`
//! holds one or more `Period`s with a start instant, a resolution and
//! 1-based `Point` positions. When no data matches the query it answers
//! with an `Acknowledgement_MarketDocument` instead, which we treat as an
//! empty result.

use super::http::get_text;
use super::provider::{DataError, FetchResult, FetchWindow, SourceFetcher};
use crate::domain::{floor_to_hour, Quantity, Source, SourceSeries, TimePoint};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ENTSOE_API_URL: &str = "https://web-api.tp.entsoe.eu/api";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EntsoeSettings {
    pub api_url: String,
    /// Environment variable holding the security token.
    pub token_env: String,
    /// EIC code of the bidding zone (DE-LU by default).
    pub bidding_zone: String,
    pub document_type: String,
    /// Window length used when no explicit start is given.
    pub default_days: i64,
}

impl Default for EntsoeSettings {
    fn default() -> Self {
        Self {
            api_url: ENTSOE_API_URL.to_string(),
            token_env: "ENTSOE_TOKEN".to_string(),
            bidding_zone: "10Y1001A1001A82H".to_string(),
            document_type: "A44".to_string(),
            default_days: 30,
        }
    }
}

// ── XML document model ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MarketDocument {
    #[serde(rename = "TimeSeries", default)]
    time_series: Vec<XmlTimeSeries>,
}

#[derive(Debug, Deserialize)]
struct XmlTimeSeries {
    #[serde(rename = "currency_Unit.name", default)]
    currency: Option<String>,
    /// A01 = one point per position; A03 = positions omitted while the
    /// value is unchanged.
    #[serde(rename = "curveType", default)]
    curve_type: Option<String>,
    #[serde(rename = "Period", default)]
    periods: Vec<XmlPeriod>,
}

#[derive(Debug, Deserialize)]
struct XmlPeriod {
    #[serde(rename = "timeInterval")]
    time_interval: XmlInterval,
    resolution: String,
    #[serde(rename = "Point", default)]
    points: Vec<XmlPoint>,
}

#[derive(Debug, Deserialize)]
struct XmlInterval {
    start: String,
    #[serde(default)]
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlPoint {
    position: u32,
    #[serde(rename = "price.amount")]
    price: f64,
}

#[derive(Debug, Deserialize)]
struct Acknowledgement {
    #[serde(rename = "Reason", default)]
    reasons: Vec<XmlReason>,
}

#[derive(Debug, Deserialize)]
struct XmlReason {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

pub struct EntsoeFetcher {
    client: Client,
    settings: EntsoeSettings,
    token: String,
}

impl EntsoeFetcher {
    pub fn new(client: Client, settings: EntsoeSettings, token: impl Into<String>) -> Self {
        Self {
            client,
            settings,
            token: token.into(),
        }
    }

    /// Read the token from the configured environment variable.
    pub fn from_env(client: Client, settings: EntsoeSettings) -> Result<Self, DataError> {
        let token = std::env::var(&settings.token_env)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        if token.is_empty() {
            return Err(DataError::AuthenticationRequired(format!(
                "set {} to an ENTSO-E security token",
                settings.token_env
            )));
        }
        Ok(Self::new(client, settings, token))
    }

    /// Concrete query window; open ends default to the trailing
    /// `default_days` ending at the current hour.
    fn resolve_window(&self, window: &FetchWindow) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = window.end.unwrap_or_else(|| floor_to_hour(Utc::now()));
        let start = window
            .start
            .unwrap_or_else(|| end - Duration::days(self.settings.default_days));
        (start, end)
    }
}

impl SourceFetcher for EntsoeFetcher {
    fn source(&self) -> Source {
        Source::Entsoe
    }

    fn quantities(&self) -> &[Quantity] {
        &[Quantity::Price]
    }

    fn fetch(&self, window: &FetchWindow) -> Result<FetchResult, DataError> {
        let (start, end) = self.resolve_window(window);
        let mut points = Vec::new();
        let mut sub_hourly = false;
        for (chunk_start, chunk_end) in request_windows(start, end) {
            let query = [
                ("securityToken", self.token.clone()),
                ("documentType", self.settings.document_type.clone()),
                ("in_Domain", self.settings.bidding_zone.clone()),
                ("out_Domain", self.settings.bidding_zone.clone()),
                ("periodStart", chunk_start.format("%Y%m%d%H%M").to_string()),
                ("periodEnd", chunk_end.format("%Y%m%d%H%M").to_string()),
            ];
            let body = get_text(&self.client, Source::Entsoe, &self.settings.api_url, &query)?;
            let parsed = parse_document(&body)?;
            tracing::debug!(%chunk_start, %chunk_end, points = parsed.points.len(), "ENTSO-E chunk");
            points.extend(parsed.points);
            sub_hourly |= parsed.sub_hourly;
        }

        let native = SourceSeries::from_points(Source::Entsoe, Quantity::Price, points)
            .clip(Some(start), Some(end));
        let hourly = native.hourly_mean();
        let raw = if sub_hourly { vec![native] } else { Vec::new() };
        Ok(FetchResult {
            source: Source::Entsoe,
            hourly: vec![hourly],
            raw,
        })
    }
}

/// The API rejects queries spanning more than one year.
const MAX_REQUEST_SPAN_DAYS: i64 = 365;

/// Split `[start, end)` into consecutive request windows of at most
/// [`MAX_REQUEST_SPAN_DAYS`].
fn request_windows(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let span = Duration::days(MAX_REQUEST_SPAN_DAYS);
    let mut out = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + span).min(end);
        out.push((cursor, next));
        cursor = next;
    }
    out
}

pub(crate) struct ParsedPrices {
    pub points: Vec<TimePoint>,
    pub sub_hourly: bool,
}

/// Parse a price document (or an acknowledgement) into points.
pub(crate) fn parse_document(body: &str) -> Result<ParsedPrices, DataError> {
    if body.contains("Acknowledgement_MarketDocument") {
        let ack: Acknowledgement = quick_xml::de::from_str(body)
            .map_err(|e| DataError::schema(Source::Entsoe, format!("acknowledgement: {e}")))?;
        let reason = ack
            .reasons
            .iter()
            .map(|r| {
                format!(
                    "{} {}",
                    r.code.as_deref().unwrap_or("?"),
                    r.text.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        tracing::warn!(%reason, "ENTSO-E returned no data");
        return Ok(ParsedPrices {
            points: Vec::new(),
            sub_hourly: false,
        });
    }

    let doc: MarketDocument = quick_xml::de::from_str(body)
        .map_err(|e| DataError::schema(Source::Entsoe, format!("market document: {e}")))?;

    let mut stepped: Vec<(i64, TimePoint)> = Vec::new();
    for series in &doc.time_series {
        if let Some(cur) = series.currency.as_deref().filter(|c| *c != "EUR") {
            return Err(DataError::schema(
                Source::Entsoe,
                format!("unexpected currency '{cur}'"),
            ));
        }
        let fill_forward = match series.curve_type.as_deref() {
            None | Some("A01") => false,
            Some("A03") => true,
            Some(other) => {
                return Err(DataError::schema(
                    Source::Entsoe,
                    format!("unsupported curveType '{other}'"),
                ))
            }
        };
        for period in &series.periods {
            let step = resolution_minutes(&period.resolution).ok_or_else(|| {
                DataError::schema(
                    Source::Entsoe,
                    format!("unsupported resolution '{}'", period.resolution),
                )
            })?;
            for point in expand_period(period, step, fill_forward)? {
                stepped.push((step, point));
            }
        }
    }

    let points = finest_per_hour(stepped);
    let sub_hourly = points.iter().any(|(step, _)| *step < 60);
    Ok(ParsedPrices {
        points: points.into_iter().map(|(_, p)| p).collect(),
        sub_hourly,
    })
}

/// Points of one period. With `fill_forward`, each listed position holds
/// until the next listed one or the end of the period.
fn expand_period(
    period: &XmlPeriod,
    step: i64,
    fill_forward: bool,
) -> Result<Vec<TimePoint>, DataError> {
    let bad_instant = |s: &str| DataError::schema(Source::Entsoe, format!("bad period instant '{s}'"));
    let start = parse_instant(&period.time_interval.start)
        .ok_or_else(|| bad_instant(period.time_interval.start.as_str()))?;
    let slots = match period.time_interval.end.as_deref() {
        Some(end) => {
            let end = parse_instant(end).ok_or_else(|| bad_instant(end))?;
            Some(u32::try_from((end - start).num_minutes() / step).unwrap_or(0))
        }
        None => None,
    };

    let mut listed: Vec<(u32, f64)> = period.points.iter().map(|p| (p.position, p.price)).collect();
    listed.sort_by_key(|(pos, _)| *pos);
    for (pos, _) in &listed {
        if *pos == 0 || slots.is_some_and(|n| *pos > n) {
            return Err(DataError::schema(
                Source::Entsoe,
                format!("point position {pos} outside period of {slots:?} slots"),
            ));
        }
    }

    let at = |pos: u32| start + Duration::minutes(step * (i64::from(pos) - 1));
    let mut out = Vec::with_capacity(slots.unwrap_or(listed.len() as u32) as usize);
    for (i, &(pos, price)) in listed.iter().enumerate() {
        let last = if fill_forward {
            match listed.get(i + 1) {
                Some(&(next, _)) => next - 1,
                None => slots.unwrap_or(pos),
            }
        } else {
            pos
        };
        out.extend((pos..=last).map(|p| TimePoint::new(at(p), price)));
    }
    Ok(out)
}

/// Where series of different resolutions cover the same hour, keep only
/// the finest one for that hour.
fn finest_per_hour(stepped: Vec<(i64, TimePoint)>) -> Vec<(i64, TimePoint)> {
    let mut finest: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
    for (step, p) in &stepped {
        let slot = finest.entry(floor_to_hour(p.ts)).or_insert(*step);
        *slot = (*slot).min(*step);
    }
    let total = stepped.len();
    let kept: Vec<_> = stepped
        .into_iter()
        .filter(|(step, p)| finest.get(&floor_to_hour(p.ts)) == Some(step))
        .collect();
    if kept.len() < total {
        tracing::debug!(dropped = total - kept.len(), "coarser duplicate resolution dropped");
    }
    kept
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ")
                .ok()
                .map(|n| n.and_utc())
        })
}

fn resolution_minutes(s: &str) -> Option<i64> {
    match s {
        "PT60M" | "PT1H" => Some(60),
        "PT30M" => Some(30),
        "PT15M" => Some(15),
        _ => None,
    }
}
