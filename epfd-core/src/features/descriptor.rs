//! Typed feature descriptors shared by the builder and the forecaster.
//!
//! A descriptor names a driver and a derivation (lag or trailing mean).
//! The ordered model-input list is enumerated once from configuration, so
//! training rows and forecast rows are assembled by the same code and never
//! by string matching on column names.

use crate::calendar::CalendarFields;
use crate::domain::Quantity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How a derived feature is computed from its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// Driver value exactly `hours` before the row.
    Lag { hours: u32 },
    /// Mean of the `hours` values strictly before the row.
    RollingMean { hours: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub driver: Quantity,
    #[serde(flatten)]
    pub kind: FeatureKind,
}

/// Read access to hourly driver values, by timestamp.
pub trait HourlyLookup {
    fn value_at(&self, quantity: Quantity, ts: DateTime<Utc>) -> Option<f64>;
}

impl FeatureDescriptor {
    pub fn lag(driver: Quantity, hours: u32) -> Self {
        Self {
            driver,
            kind: FeatureKind::Lag { hours },
        }
    }

    pub fn rolling_mean(driver: Quantity, hours: u32) -> Self {
        Self {
            driver,
            kind: FeatureKind::RollingMean { hours },
        }
    }

    /// Persisted column name, e.g. `price_eur_mwh_lag24`.
    pub fn column_name(&self) -> String {
        match self.kind {
            FeatureKind::Lag { hours } => format!("{}_lag{hours}", self.driver.column()),
            FeatureKind::RollingMean { hours } => {
                format!("{}_roll{hours}_mean", self.driver.column())
            }
        }
    }

    /// Hours of trailing history needed before the first computable row.
    pub fn lookback(&self) -> u32 {
        match self.kind {
            FeatureKind::Lag { hours } | FeatureKind::RollingMean { hours } => hours,
        }
    }

    /// Value at `ts`. Reads only hours strictly before `ts`; a rolling mean
    /// needs every hour of its window.
    pub fn evaluate<L: HourlyLookup + ?Sized>(&self, src: &L, ts: DateTime<Utc>) -> Option<f64> {
        match self.kind {
            FeatureKind::Lag { hours } => {
                src.value_at(self.driver, ts - Duration::hours(i64::from(hours)))
            }
            FeatureKind::RollingMean { hours } => {
                if hours == 0 {
                    return None;
                }
                let mut sum = 0.0;
                for k in 1..=i64::from(hours) {
                    sum += src.value_at(self.driver, ts - Duration::hours(k))?;
                }
                Some(sum / f64::from(hours))
            }
        }
    }
}

/// Calendar columns, in model-input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarField {
    Hour,
    Dow,
    IsWeekend,
    IsHoliday,
}

impl CalendarField {
    pub const ALL: [CalendarField; 4] = [
        CalendarField::Hour,
        CalendarField::Dow,
        CalendarField::IsWeekend,
        CalendarField::IsHoliday,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CalendarField::Hour => "hour",
            CalendarField::Dow => "dow",
            CalendarField::IsWeekend => "is_weekend",
            CalendarField::IsHoliday => "is_holiday",
        }
    }

    pub fn value(&self, fields: &CalendarFields) -> f64 {
        let idx = match self {
            CalendarField::Hour => 0,
            CalendarField::Dow => 1,
            CalendarField::IsWeekend => 2,
            CalendarField::IsHoliday => 3,
        };
        fields.as_features()[idx]
    }
}

/// One column of the model's input vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelInput {
    /// Contemporaneous exogenous driver.
    Driver(Quantity),
    RenewablesShare,
    Calendar(CalendarField),
    Derived(FeatureDescriptor),
}

impl ModelInput {
    pub fn name(&self) -> String {
        match self {
            ModelInput::Driver(q) => q.column().to_string(),
            ModelInput::RenewablesShare => "renewables_share".to_string(),
            ModelInput::Calendar(c) => c.name().to_string(),
            ModelInput::Derived(d) => d.column_name(),
        }
    }
}

/// Configured derivations: which drivers get lags and rolling means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSpec {
    pub lag_drivers: Vec<Quantity>,
    pub lag_hours: Vec<u32>,
    pub rolling_windows: Vec<u32>,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            lag_drivers: vec![Quantity::Price, Quantity::Load],
            lag_hours: vec![1, 24, 48, 168],
            rolling_windows: vec![24, 168],
        }
    }
}

/// The enumerated feature layout: target, descriptors and model inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    target: Quantity,
    exogenous: Vec<Quantity>,
    descriptors: Vec<FeatureDescriptor>,
    inputs: Vec<ModelInput>,
}

impl FeatureSet {
    /// Target is the day-ahead price; every other quantity is exogenous.
    pub fn from_spec(spec: &FeatureSpec) -> Self {
        let target = Quantity::Price;
        let exogenous: Vec<Quantity> = Quantity::ALL
            .into_iter()
            .filter(|q| *q != target)
            .collect();

        let mut descriptors = Vec::new();
        for driver in &spec.lag_drivers {
            for &h in &spec.lag_hours {
                descriptors.push(FeatureDescriptor::lag(*driver, h));
            }
            for &w in &spec.rolling_windows {
                descriptors.push(FeatureDescriptor::rolling_mean(*driver, w));
            }
        }

        let inputs = exogenous
            .iter()
            .map(|q| ModelInput::Driver(*q))
            .chain(std::iter::once(ModelInput::RenewablesShare))
            .chain(CalendarField::ALL.into_iter().map(ModelInput::Calendar))
            .chain(descriptors.iter().map(|d| ModelInput::Derived(*d)))
            .collect();

        Self {
            target,
            exogenous,
            descriptors,
            inputs,
        }
    }

    pub fn target(&self) -> Quantity {
        self.target
    }

    pub fn exogenous(&self) -> &[Quantity] {
        &self.exogenous
    }

    pub fn descriptors(&self) -> &[FeatureDescriptor] {
        &self.descriptors
    }

    pub fn inputs(&self) -> &[ModelInput] {
        &self.inputs
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(ModelInput::name).collect()
    }

    /// Longest lookback across descriptors.
    pub fn max_lookback(&self) -> u32 {
        self.descriptors.iter().map(|d| d.lookback()).max().unwrap_or(0)
    }

    /// Position of a descriptor's value in `FeatureRow::derived`.
    pub fn derived_index(&self, descriptor: &FeatureDescriptor) -> Option<usize> {
        self.descriptors.iter().position(|d| d == descriptor)
    }

    /// Assemble an input vector by asking `value` for each input in order.
    pub fn assemble<F>(&self, mut value: F) -> Vec<Option<f64>>
    where
        F: FnMut(&ModelInput) -> Option<f64>,
    {
        self.inputs.iter().map(|i| value(i)).collect()
    }
}
