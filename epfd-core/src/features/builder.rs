//! Feature builder: reconciled hourly grid → complete feature rows.
//!
//! Rows are only materialised when every model input and the target are
//! present. Rows at the start of history (not enough trailing hours for the
//! longest lag or window) and rows with any missing driver are dropped,
//! never imputed.

use super::descriptor::{FeatureSet, HourlyLookup, ModelInput};
use crate::calendar::{CalendarContext, CalendarFields};
use crate::domain::Quantity;
use crate::reconcile::ReconciledFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One complete hourly record for training and serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub ts: DateTime<Utc>,
    pub price: f64,
    pub load: f64,
    pub wind: f64,
    pub solar: f64,
    pub renewables_share: f64,
    pub calendar: CalendarFields,
    /// Derived values, in `FeatureSet::descriptors` order.
    pub derived: Vec<f64>,
}

impl FeatureRow {
    pub fn driver(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Price => self.price,
            Quantity::Load => self.load,
            Quantity::Wind => self.wind,
            Quantity::Solar => self.solar,
        }
    }

    pub fn target(&self, set: &FeatureSet) -> f64 {
        self.driver(set.target())
    }

    /// Model input vector in `FeatureSet::inputs` order.
    pub fn input_vector(&self, set: &FeatureSet) -> Vec<f64> {
        let mut derived = self.derived.iter().copied();
        set.assemble(|input| match input {
            ModelInput::Driver(q) => Some(self.driver(*q)),
            ModelInput::RenewablesShare => Some(self.renewables_share),
            ModelInput::Calendar(c) => Some(c.value(&self.calendar)),
            ModelInput::Derived(_) => derived.next(),
        })
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect()
    }
}

impl HourlyLookup for ReconciledFrame {
    fn value_at(&self, quantity: Quantity, ts: DateTime<Utc>) -> Option<f64> {
        self.index_of(ts).and_then(|i| self.rows()[i].get(quantity))
    }
}

/// Why the builder kept or dropped rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub grid_rows: usize,
    pub kept_rows: usize,
    /// Rows before the longest lookback could be satisfied.
    pub warmup_rows: usize,
    /// Rows past warm-up with at least one missing field.
    pub incomplete_rows: usize,
    /// Quantities with no value anywhere on the grid.
    pub absent_drivers: Vec<Quantity>,
    pub required_lookback_hours: u32,
}

/// Cause of an empty feature table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyCause {
    /// At least one required quantity was absent from every source.
    DriverAbsent(Vec<Quantity>),
    /// Grid shorter than the longest configured lookback.
    InsufficientHistory { grid_rows: usize, required: u32 },
    /// Enough history, but no single hour had every field present.
    NoCompleteRows,
}

impl BuildReport {
    /// `None` when at least one row was kept.
    pub fn empty_cause(&self) -> Option<EmptyCause> {
        if self.kept_rows > 0 {
            return None;
        }
        if !self.absent_drivers.is_empty() {
            return Some(EmptyCause::DriverAbsent(self.absent_drivers.clone()));
        }
        if self.grid_rows <= self.required_lookback_hours as usize {
            return Some(EmptyCause::InsufficientHistory {
                grid_rows: self.grid_rows,
                required: self.required_lookback_hours,
            });
        }
        Some(EmptyCause::NoCompleteRows)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureBuild {
    pub rows: Vec<FeatureRow>,
    pub report: BuildReport,
}

/// Build the ordered feature rows for a reconciled frame.
pub fn build_features(
    frame: &ReconciledFrame,
    set: &FeatureSet,
    calendar: &CalendarContext,
) -> FeatureBuild {
    let lookback = set.max_lookback() as usize;
    let mut report = BuildReport {
        grid_rows: frame.len(),
        absent_drivers: frame.absent_quantities(),
        required_lookback_hours: set.max_lookback(),
        ..Default::default()
    };

    let mut annotator = calendar.annotator();
    let mut rows = Vec::with_capacity(frame.len().saturating_sub(lookback));

    for (i, grid) in frame.rows().iter().enumerate() {
        if i < lookback {
            report.warmup_rows += 1;
            continue;
        }
        let derived: Option<Vec<f64>> = set
            .descriptors()
            .iter()
            .map(|d| d.evaluate(frame, grid.ts))
            .collect();

        let complete = (|| {
            Some(FeatureRow {
                ts: grid.ts,
                price: grid.get(Quantity::Price)?,
                load: grid.get(Quantity::Load)?,
                wind: grid.get(Quantity::Wind)?,
                solar: grid.get(Quantity::Solar)?,
                renewables_share: grid.renewables_share?,
                calendar: annotator.annotate(grid.ts),
                derived: derived?,
            })
        })();

        match complete {
            Some(row) => rows.push(row),
            None => report.incomplete_rows += 1,
        }
    }

    report.kept_rows = rows.len();
    tracing::info!(
        grid = report.grid_rows,
        kept = report.kept_rows,
        warmup = report.warmup_rows,
        incomplete = report.incomplete_rows,
        "built feature rows"
    );
    FeatureBuild { rows, report }
}
