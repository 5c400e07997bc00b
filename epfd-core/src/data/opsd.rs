//! OPSD bootstrap fetcher: the 60-minute single-index time-series bundle.
//!
//! The bundle carries every quantity we need for Germany, but column names
//! drifted over releases (`DE_LU_*` after the 2018 bidding-zone split, `DE_*`
//! before), so each quantity has a preference list. The first present
//! column wins; a quantity with no match is a schema error.

use super::http::get_text;
use super::provider::{DataError, FetchResult, FetchWindow, SourceFetcher};
use crate::domain::{Quantity, Source, SourceSeries, TimePoint};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

pub const OPSD_URL: &str =
    "https://data.open-power-system-data.org/time_series/latest/time_series_60min_singleindex.csv";

/// Candidate column names per quantity, most preferred first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpsdColumns {
    pub price: Vec<String>,
    pub load: Vec<String>,
    pub wind: Vec<String>,
    pub solar: Vec<String>,
}

impl Default for OpsdColumns {
    fn default() -> Self {
        let v = |a: &str, b: &str| vec![a.to_string(), b.to_string()];
        Self {
            price: v("DE_LU_price_day_ahead", "DE_day_ahead_price_EUR_per_MWh"),
            load: v(
                "DE_LU_load_actual_entsoe_transparency",
                "DE_load_actual_entsoe_transparency",
            ),
            wind: v("DE_LU_wind_generation_actual", "DE_wind_generation_actual"),
            solar: v("DE_LU_solar_generation_actual", "DE_solar_generation_actual"),
        }
    }
}

impl OpsdColumns {
    fn candidates(&self, quantity: Quantity) -> &[String] {
        match quantity {
            Quantity::Price => &self.price,
            Quantity::Load => &self.load,
            Quantity::Wind => &self.wind,
            Quantity::Solar => &self.solar,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpsdSettings {
    /// HTTP(S) URL or local path of the CSV bundle.
    pub location: String,
    pub timestamp_column: String,
    pub columns: OpsdColumns,
}

impl Default for OpsdSettings {
    fn default() -> Self {
        Self {
            location: OPSD_URL.to_string(),
            timestamp_column: "utc_timestamp".to_string(),
            columns: OpsdColumns::default(),
        }
    }
}

pub struct OpsdFetcher {
    client: Client,
    settings: OpsdSettings,
}

impl OpsdFetcher {
    pub fn new(client: Client, settings: OpsdSettings) -> Self {
        Self { client, settings }
    }

    fn read_body(&self) -> Result<String, DataError> {
        let loc = &self.settings.location;
        if loc.starts_with("http://") || loc.starts_with("https://") {
            get_text(&self.client, Source::Opsd, loc, &[])
        } else {
            std::fs::read_to_string(Path::new(loc))
                .map_err(|e| DataError::ValidationError(format!("read OPSD bundle {loc}: {e}")))
        }
    }
}

impl SourceFetcher for OpsdFetcher {
    fn source(&self) -> Source {
        Source::Opsd
    }

    fn quantities(&self) -> &[Quantity] {
        &Quantity::ALL
    }

    fn fetch(&self, window: &FetchWindow) -> Result<FetchResult, DataError> {
        tracing::info!(location = %self.settings.location, "downloading OPSD bundle");
        let body = self.read_body()?;
        let hourly = parse_opsd_csv(body.as_bytes(), &self.settings, window)?;
        Ok(FetchResult {
            source: Source::Opsd,
            hourly,
            raw: Vec::new(),
        })
    }
}

/// Parse the bundle into one series per quantity, clipped to the window.
pub fn parse_opsd_csv<R: Read>(
    reader: R,
    settings: &OpsdSettings,
    window: &FetchWindow,
) -> Result<Vec<SourceSeries>, DataError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| DataError::schema(Source::Opsd, format!("unreadable header: {e}")))?
        .clone();

    let ts_idx = headers
        .iter()
        .position(|h| h == settings.timestamp_column)
        .ok_or_else(|| {
            DataError::schema(
                Source::Opsd,
                format!("missing timestamp column '{}'", settings.timestamp_column),
            )
        })?;

    let mut picked = Vec::with_capacity(Quantity::ALL.len());
    let mut missing = Vec::new();
    for q in Quantity::ALL {
        let found = settings
            .columns
            .candidates(q)
            .iter()
            .find_map(|name| headers.iter().position(|h| h == name));
        match found {
            Some(idx) => picked.push((q, idx)),
            None => missing.push(q.key()),
        }
    }
    if !missing.is_empty() {
        return Err(DataError::schema(
            Source::Opsd,
            format!("missing required columns: {}", missing.join(", ")),
        ));
    }
    for (q, idx) in &picked {
        tracing::debug!(quantity = %q, column = &headers[*idx], "OPSD column selected");
    }

    let mut buffers: Vec<Vec<TimePoint>> = vec![Vec::new(); picked.len()];
    for (line, record) in rdr.records().enumerate() {
        let record = record
            .map_err(|e| DataError::schema(Source::Opsd, format!("row {}: {e}", line + 2)))?;
        let raw_ts = record.get(ts_idx).unwrap_or_default();
        let ts = parse_utc(raw_ts).ok_or_else(|| {
            DataError::schema(Source::Opsd, format!("row {}: bad timestamp '{raw_ts}'", line + 2))
        })?;
        if !window.contains(ts) {
            continue;
        }
        for (slot, (_, idx)) in picked.iter().enumerate() {
            // Empty or non-numeric cells are gaps.
            if let Some(v) = record.get(*idx).and_then(|c| c.trim().parse::<f64>().ok()) {
                buffers[slot].push(TimePoint::new(ts, v));
            }
        }
    }

    Ok(picked
        .iter()
        .zip(buffers)
        .map(|((q, _), pts)| SourceSeries::from_points(Source::Opsd, *q, pts))
        .collect())
}

fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .ok()
                .map(|n| n.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BUNDLE: &str = "\
utc_timestamp,cet_cest_timestamp,DE_load_actual_entsoe_transparency,DE_LU_load_actual_entsoe_transparency,DE_LU_price_day_ahead,DE_LU_solar_generation_actual,DE_wind_generation_actual
2019-01-01T00:00:00Z,2019-01-01T01:00:00+0100,1.0,40000.5,10.1,0,12000
2019-01-01T01:00:00Z,2019-01-01T02:00:00+0100,1.0,39000,,0,12500
2019-01-01T02:00:00Z,2019-01-01T03:00:00+0100,1.0,38000,8.5,0,13000
";

    #[test]
    fn prefers_de_lu_columns_and_falls_back() {
        let series = parse_opsd_csv(
            BUNDLE.as_bytes(),
            &OpsdSettings::default(),
            &FetchWindow::default(),
        )
        .unwrap();
        let load = series.iter().find(|s| s.quantity == Quantity::Load).unwrap();
        assert_eq!(load.points()[0].value, 40000.5);
        let wind = series.iter().find(|s| s.quantity == Quantity::Wind).unwrap();
        assert_eq!(wind.len(), 3);
        assert_eq!(wind.points()[2].value, 13000.0);
    }

    #[test]
    fn empty_cells_are_gaps() {
        let series = parse_opsd_csv(
            BUNDLE.as_bytes(),
            &OpsdSettings::default(),
            &FetchWindow::default(),
        )
        .unwrap();
        let price = series.iter().find(|s| s.quantity == Quantity::Price).unwrap();
        assert_eq!(price.len(), 2);
        let t1 = Utc.with_ymd_and_hms(2019, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(price.get(t1), None);
    }

    #[test]
    fn missing_quantity_column_is_schema_error() {
        let csv = "utc_timestamp,DE_LU_price_day_ahead\n2019-01-01T00:00:00Z,1\n";
        let err = parse_opsd_csv(csv.as_bytes(), &OpsdSettings::default(), &FetchWindow::default())
            .unwrap_err();
        match err {
            DataError::UpstreamSchema { feed, detail } => {
                assert_eq!(feed, Source::Opsd);
                assert!(detail.contains("load"));
                assert!(detail.contains("solar"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn window_filters_rows() {
        let start = Utc.with_ymd_and_hms(2019, 1, 1, 1, 0, 0).unwrap();
        let series = parse_opsd_csv(
            BUNDLE.as_bytes(),
            &OpsdSettings::default(),
            &FetchWindow::new(Some(start), None),
        )
        .unwrap();
        let load = series.iter().find(|s| s.quantity == Quantity::Load).unwrap();
        assert_eq!(load.first_ts(), Some(start));
        assert_eq!(load.len(), 2);
    }
}
