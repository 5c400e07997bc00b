//! Multi-source reconciliation and hourly grid alignment.
//!
//! Per quantity, source series are unioned in ascending precedence order
//! and the last writer wins at every timestamp, so the highest-precedence
//! source present at a timestamp is authoritative. No blending across
//! sources.
//!
//! Across quantities, the reconciled series are outer-joined and put on a
//! contiguous UTC hourly grid. Missing values stay missing (`None`), never
//! zero.

use crate::domain::{floor_to_hour, Quantity, Source, SourceSeries, TimePoint};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One fetcher-agnostic series per quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledSeries {
    pub quantity: Quantity,
    /// Strictly increasing timestamps, one value each.
    pub points: Vec<TimePoint>,
    /// Source that supplied each point, parallel to `points`.
    pub origin: Vec<Source>,
}

impl ReconciledSeries {
    pub fn get(&self, ts: DateTime<Utc>) -> Option<f64> {
        self.points
            .binary_search_by(|p| p.ts.cmp(&ts))
            .ok()
            .map(|i| self.points[i].value)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points each source won.
    pub fn origin_counts(&self) -> BTreeMap<Source, usize> {
        let mut counts = BTreeMap::new();
        for s in &self.origin {
            *counts.entry(*s).or_insert(0) += 1;
        }
        counts
    }
}

/// Reconcile the series of one quantity, given in ascending precedence
/// order (lowest first). Series for other quantities are ignored.
pub fn reconcile(quantity: Quantity, ascending: &[&SourceSeries]) -> ReconciledSeries {
    let mut merged: BTreeMap<DateTime<Utc>, (f64, Source)> = BTreeMap::new();
    for series in ascending {
        if series.quantity != quantity {
            tracing::warn!(
                expected = %quantity,
                got = %series.quantity,
                source = %series.source,
                "skipping series for a different quantity"
            );
            continue;
        }
        for p in series.points() {
            merged.insert(p.ts, (p.value, series.source));
        }
    }

    let (points, origin) = merged
        .into_iter()
        .map(|(ts, (value, src))| (TimePoint::new(ts, value), src))
        .unzip();
    ReconciledSeries {
        quantity,
        points,
        origin,
    }
}

/// `(wind + solar) / load`, defined only for strictly positive, finite load
/// and present wind and solar. Never negative.
pub fn renewables_share(load: Option<f64>, wind: Option<f64>, solar: Option<f64>) -> Option<f64> {
    let (load, wind, solar) = (load?, wind?, solar?);
    if !(load.is_finite() && load > 0.0) {
        return None;
    }
    let share = (wind + solar) / load;
    (share.is_finite() && share >= 0.0).then_some(share)
}

/// One hour of the aligned grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRow {
    pub ts: DateTime<Utc>,
    /// Indexed by [`Quantity::index`].
    pub values: [Option<f64>; 4],
    pub renewables_share: Option<f64>,
}

impl GridRow {
    pub fn get(&self, quantity: Quantity) -> Option<f64> {
        self.values[quantity.index()]
    }
}

/// All quantities on a contiguous hourly UTC grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciledFrame {
    rows: Vec<GridRow>,
}

impl ReconciledFrame {
    /// Outer-join the series, average within each hour bucket, and fill the
    /// span from the first to the last bucket with explicit rows.
    pub fn align(series: &[ReconciledSeries]) -> Self {
        let mut buckets: BTreeMap<DateTime<Utc>, [(f64, u32); 4]> = BTreeMap::new();
        for s in series {
            let col = s.quantity.index();
            for p in &s.points {
                let slot = &mut buckets.entry(floor_to_hour(p.ts)).or_insert([(0.0, 0); 4])[col];
                slot.0 += p.value;
                slot.1 += 1;
            }
        }

        let (Some(first), Some(last)) = (
            buckets.keys().next().copied(),
            buckets.keys().next_back().copied(),
        ) else {
            return Self::default();
        };

        let hours = (last - first).num_hours();
        let mut rows = Vec::with_capacity(hours as usize + 1);
        let mut ts = first;
        while ts <= last {
            let mut values = [None; 4];
            if let Some(cells) = buckets.get(&ts) {
                for (v, (sum, n)) in values.iter_mut().zip(cells) {
                    if *n > 0 {
                        *v = Some(sum / f64::from(*n));
                    }
                }
            }
            let share = renewables_share(
                values[Quantity::Load.index()],
                values[Quantity::Wind.index()],
                values[Quantity::Solar.index()],
            );
            rows.push(GridRow {
                ts,
                values,
                renewables_share: share,
            });
            ts += Duration::hours(1);
        }
        Self { rows }
    }

    pub fn from_rows(rows: Vec<GridRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_ts(&self) -> Option<DateTime<Utc>> {
        self.rows.first().map(|r| r.ts)
    }

    /// Quantities with no value anywhere on the grid.
    pub fn absent_quantities(&self) -> Vec<Quantity> {
        Quantity::ALL
            .into_iter()
            .filter(|q| self.rows.iter().all(|r| r.get(*q).is_none()))
            .collect()
    }

    /// Row index of `ts`, if it lies on the grid.
    pub fn index_of(&self, ts: DateTime<Utc>) -> Option<usize> {
        let first = self.first_ts()?;
        let offset = (ts - first).num_hours();
        if offset < 0 || first + Duration::hours(offset) != ts {
            return None;
        }
        let idx = offset as usize;
        (idx < self.rows.len()).then_some(idx)
    }
}
