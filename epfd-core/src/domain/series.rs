//! TimePoint and SourceSeries: one fetcher's view of one quantity.

use super::quantity::{Quantity, Source};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single observation: value of the owning series' quantity at `ts`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub ts: DateTime<Utc>,
    pub value: f64,
}

impl TimePoint {
    pub fn new(ts: DateTime<Utc>, value: f64) -> Self {
        Self { ts, value }
    }
}

/// Truncate a timestamp to the top of its UTC hour.
pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    // duration_trunc only fails for out-of-range timestamps; keep the input then.
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

/// Ordered, deduplicated observations from one source for one quantity.
///
/// Invariant: timestamps are strictly increasing. Every constructor enforces
/// it, and a repeated timestamp keeps the value that arrived last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSeries {
    pub source: Source,
    pub quantity: Quantity,
    points: Vec<TimePoint>,
}

impl SourceSeries {
    /// An empty series (source had no data in range).
    pub fn empty(source: Source, quantity: Quantity) -> Self {
        Self {
            source,
            quantity,
            points: Vec::new(),
        }
    }

    /// Build from points in arrival order. Non-finite values are skipped so
    /// gaps stay explicit; repeated timestamps keep the latest arrival.
    pub fn from_points(
        source: Source,
        quantity: Quantity,
        points: impl IntoIterator<Item = TimePoint>,
    ) -> Self {
        let mut by_ts: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        for p in points {
            if p.value.is_finite() {
                by_ts.insert(p.ts, p.value);
            }
        }
        Self {
            source,
            quantity,
            points: by_ts
                .into_iter()
                .map(|(ts, value)| TimePoint { ts, value })
                .collect(),
        }
    }

    pub fn points(&self) -> &[TimePoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<TimePoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_ts(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.ts)
    }

    pub fn last_ts(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.ts)
    }

    /// Value at exactly `ts`, if present.
    pub fn get(&self, ts: DateTime<Utc>) -> Option<f64> {
        self.points
            .binary_search_by(|p| p.ts.cmp(&ts))
            .ok()
            .map(|i| self.points[i].value)
    }

    /// Accumulate a newer fetch on top of this snapshot: union of
    /// timestamps, and the newer fetch wins where both cover a timestamp.
    pub fn merge_newer(&self, newer: &SourceSeries) -> SourceSeries {
        SourceSeries::from_points(
            self.source,
            self.quantity,
            self.points
                .iter()
                .chain(newer.points.iter())
                .copied(),
        )
    }

    /// Keep only points with `start <= ts < end`.
    pub fn clip(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> SourceSeries {
        SourceSeries {
            source: self.source,
            quantity: self.quantity,
            points: self
                .points
                .iter()
                .filter(|p| start.map_or(true, |s| p.ts >= s) && end.map_or(true, |e| p.ts < e))
                .copied()
                .collect(),
        }
    }

    /// Hourly view: mean of the finite values inside each UTC hour bucket.
    pub fn hourly_mean(&self) -> SourceSeries {
        let mut buckets: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
        for p in &self.points {
            let slot = buckets.entry(floor_to_hour(p.ts)).or_insert((0.0, 0));
            slot.0 += p.value;
            slot.1 += 1;
        }
        SourceSeries {
            source: self.source,
            quantity: self.quantity,
            points: buckets
                .into_iter()
                .map(|(ts, (sum, n))| TimePoint::new(ts, sum / n as f64))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn from_points_sorts_and_keeps_last_duplicate() {
        let s = SourceSeries::from_points(
            Source::Smard,
            Quantity::Load,
            vec![
                TimePoint::new(ts(2, 0), 3.0),
                TimePoint::new(ts(0, 0), 1.0),
                TimePoint::new(ts(2, 0), 30.0),
            ],
        );
        assert_eq!(s.len(), 2);
        assert_eq!(s.points()[0].ts, ts(0, 0));
        assert_eq!(s.get(ts(2, 0)), Some(30.0));
    }

    #[test]
    fn non_finite_values_are_gaps() {
        let s = SourceSeries::from_points(
            Source::Opsd,
            Quantity::Price,
            vec![TimePoint::new(ts(0, 0), f64::NAN), TimePoint::new(ts(1, 0), 5.0)],
        );
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(ts(0, 0)), None);
    }

    #[test]
    fn merge_newer_overwrites_overlap() {
        let old = SourceSeries::from_points(
            Source::Entsoe,
            Quantity::Price,
            vec![TimePoint::new(ts(0, 0), 1.0), TimePoint::new(ts(1, 0), 2.0)],
        );
        let new = SourceSeries::from_points(
            Source::Entsoe,
            Quantity::Price,
            vec![TimePoint::new(ts(1, 0), 20.0), TimePoint::new(ts(2, 0), 3.0)],
        );
        let merged = old.merge_newer(&new);
        let values: Vec<f64> = merged.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 20.0, 3.0]);
    }

    #[test]
    fn hourly_mean_buckets_quarter_hours() {
        let s = SourceSeries::from_points(
            Source::Smard,
            Quantity::Wind,
            vec![
                TimePoint::new(ts(0, 0), 10.0),
                TimePoint::new(ts(0, 15), 20.0),
                TimePoint::new(ts(0, 30), 30.0),
                TimePoint::new(ts(0, 45), 40.0),
                TimePoint::new(ts(1, 0), 7.0),
            ],
        );
        let h = s.hourly_mean();
        assert_eq!(h.len(), 2);
        assert_eq!(h.get(ts(0, 0)), Some(25.0));
        assert_eq!(h.get(ts(1, 0)), Some(7.0));
    }

    #[test]
    fn clip_is_half_open() {
        let s = SourceSeries::from_points(
            Source::Opsd,
            Quantity::Load,
            (0..5).map(|h| TimePoint::new(ts(h, 0), h as f64)),
        );
        let c = s.clip(Some(ts(1, 0)), Some(ts(3, 0)));
        assert_eq!(c.len(), 2);
        assert_eq!(c.first_ts(), Some(ts(1, 0)));
        assert_eq!(c.last_ts(), Some(ts(2, 0)));
    }
}
