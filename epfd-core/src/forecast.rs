//! Autoregressive multi-hour forecaster.
//!
//! Future hours are produced strictly in order as a fold over the horizon.
//! The fold state is the working series (history extended with proxies and
//! synthesized medians) plus the last input vector used. Each step:
//!
//! 1. computes calendar fields exactly,
//! 2. fills exogenous drivers with the same-local-hour mean of the recent
//!    past,
//! 3. evaluates lag and rolling descriptors against the working series,
//! 4. backfills anything still missing from the previous step's inputs
//!    (zero if there is none),
//! 5. predicts every quantile and writes the median back as the realised
//!    price for later lags.

use crate::calendar::CalendarContext;
use crate::domain::Quantity;
use crate::features::{FeatureRow, FeatureSet, HourlyLookup, ModelInput};
use crate::model::{ModelError, Quantile, QuantileModels};
use crate::reconcile::renewables_share;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("no feature history to forecast from")]
    EmptyHistory,

    #[error("forecast needs a median (q50) model to roll lags forward")]
    MissingMedian,

    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub horizon_hours: usize,
    /// Days of history feeding the same-hour exogenous profile.
    pub profile_days: i64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            horizon_hours: 24,
            profile_days: 28,
        }
    }
}

/// Predicted value per quantile for one future hour, ascending by level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub ts: DateTime<Utc>,
    pub values: Vec<(Quantile, f64)>,
}

impl ForecastRow {
    pub fn get(&self, quantile: Quantile) -> Option<f64> {
        self.values
            .iter()
            .find(|(q, _)| *q == quantile)
            .map(|(_, v)| *v)
    }

    pub fn median(&self) -> Option<f64> {
        self.get(Quantile::MEDIAN)
    }

    /// Adjacent quantile pairs whose predictions decrease.
    pub fn crossings(&self) -> Vec<(Quantile, Quantile)> {
        self.values
            .windows(2)
            .filter(|w| w[1].1 < w[0].1)
            .map(|w| (w[0].0, w[1].0))
            .collect()
    }
}

/// Working series: history values, exogenous proxies, synthesized medians.
struct ForecastState {
    series: [BTreeMap<DateTime<Utc>, f64>; 4],
    last_inputs: Vec<f64>,
}

impl HourlyLookup for ForecastState {
    fn value_at(&self, quantity: Quantity, ts: DateTime<Utc>) -> Option<f64> {
        self.series[quantity.index()].get(&ts).copied()
    }
}

pub struct Forecaster<'a> {
    set: &'a FeatureSet,
    calendar: &'a CalendarContext,
    models: &'a QuantileModels,
    settings: ForecastSettings,
}

impl<'a> Forecaster<'a> {
    pub fn new(
        set: &'a FeatureSet,
        calendar: &'a CalendarContext,
        models: &'a QuantileModels,
        settings: ForecastSettings,
    ) -> Self {
        Self {
            set,
            calendar,
            models,
            settings,
        }
    }

    /// Forecast `horizon_hours` hours after the last history row.
    pub fn forecast(&self, history: &[FeatureRow]) -> Result<Vec<ForecastRow>, ForecastError> {
        let last = history.last().ok_or(ForecastError::EmptyHistory)?;
        if self.models.median().is_none() {
            return Err(ForecastError::MissingMedian);
        }

        let profile = self.exogenous_profile(history, last.ts);
        let state = ForecastState {
            series: std::array::from_fn(|i| {
                let q = Quantity::ALL[i];
                history.iter().map(|r| (r.ts, r.driver(q))).collect()
            }),
            last_inputs: last.input_vector(self.set),
        };
        let mut annotator = self.calendar.annotator();
        let target = self.set.target();

        let (_, rows) = (1..=self.settings.horizon_hours as i64).try_fold(
            (state, Vec::with_capacity(self.settings.horizon_hours)),
            |(mut state, mut rows), step| {
                let ts = last.ts + Duration::hours(step);
                let cal = annotator.annotate(ts);

                let local_hour = ts.with_timezone(&self.calendar.tz).hour();
                for q in self.set.exogenous() {
                    if let Some(v) = profile.get(&(*q, local_hour)) {
                        state.series[q.index()].insert(ts, *v);
                    }
                }
                let share = renewables_share(
                    state.value_at(Quantity::Load, ts),
                    state.value_at(Quantity::Wind, ts),
                    state.value_at(Quantity::Solar, ts),
                );

                let raw = self.set.assemble(|input| match input {
                    ModelInput::Driver(q) => state.value_at(*q, ts),
                    ModelInput::RenewablesShare => share,
                    ModelInput::Calendar(c) => Some(c.value(&cal)),
                    ModelInput::Derived(d) => d.evaluate(&state, ts),
                });
                let inputs: Vec<f64> = raw
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        v.or_else(|| state.last_inputs.get(i).copied())
                            .unwrap_or(0.0)
                    })
                    .collect();

                let values = self.models.predict_all(&inputs)?;
                let row = ForecastRow { ts, values };
                let median = row.median().ok_or(ForecastError::MissingMedian)?;
                let crossings = row.crossings();
                if !crossings.is_empty() {
                    tracing::warn!(%ts, pairs = crossings.len(), "quantile crossing in forecast");
                }

                state.series[target.index()].insert(ts, median);
                state.last_inputs = inputs;
                rows.push(row);
                Ok::<_, ForecastError>((state, rows))
            },
        )?;
        Ok(rows)
    }

    /// Mean of each exogenous driver per local hour-of-day over the last
    /// `profile_days` days of history.
    fn exogenous_profile(
        &self,
        history: &[FeatureRow],
        last_ts: DateTime<Utc>,
    ) -> HashMap<(Quantity, u32), f64> {
        let cutoff = last_ts - Duration::days(self.settings.profile_days);
        let mut acc: HashMap<(Quantity, u32), (f64, usize)> = HashMap::new();
        for row in history.iter().filter(|r| r.ts >= cutoff) {
            let hour = row.ts.with_timezone(&self.calendar.tz).hour();
            for q in self.set.exogenous() {
                let slot = acc.entry((*q, hour)).or_insert((0.0, 0));
                slot.0 += row.driver(*q);
                slot.1 += 1;
            }
        }
        acc.into_iter()
            .map(|(k, (sum, n))| (k, sum / n as f64))
            .collect()
    }
}

/// Single-step prediction from the most recent feature row, as served on
/// demand.
pub fn predict_next_hour(
    row: &FeatureRow,
    set: &FeatureSet,
    models: &QuantileModels,
) -> Result<ForecastRow, ForecastError> {
    let values = models.predict_all(&row.input_vector(set))?;
    Ok(ForecastRow { ts: row.ts, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::HolidayCalendar;
    use crate::features::{FeatureDescriptor, FeatureSpec};
    use crate::model::QuantileRegressor;
    use chrono::TimeZone;

    /// Median predicts price lag-1 + 1; other quantiles offset from it.
    struct Echo {
        q: Quantile,
        lag1_pos: usize,
        offset: f64,
        names: Vec<String>,
    }

    impl QuantileRegressor for Echo {
        fn quantile(&self) -> Quantile {
            self.q
        }
        fn feature_names(&self) -> &[String] {
            &self.names
        }
        fn predict(&self, x: &[f64]) -> Result<f64, ModelError> {
            Ok(x[self.lag1_pos] + 1.0 + self.offset)
        }
    }

    fn set() -> FeatureSet {
        FeatureSet::from_spec(&FeatureSpec {
            lag_drivers: vec![Quantity::Price],
            lag_hours: vec![1, 2],
            rolling_windows: vec![],
        })
    }

    fn models(set: &FeatureSet) -> QuantileModels {
        let pos = set
            .inputs()
            .iter()
            .position(|i| *i == ModelInput::Derived(FeatureDescriptor::lag(Quantity::Price, 1)))
            .unwrap();
        let mk = |p: u8, offset: f64| -> Box<dyn QuantileRegressor> {
            Box::new(Echo {
                q: Quantile::from_percent(p).unwrap(),
                lag1_pos: pos,
                offset,
                names: set.input_names(),
            })
        };
        QuantileModels::new(vec![mk(10, -5.0), mk(50, 0.0), mk(90, 5.0)])
    }

    fn history(set: &FeatureSet, hours: i64) -> Vec<FeatureRow> {
        let t0 = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let ctx = CalendarContext::germany();
        (0..hours)
            .map(|h| {
                let ts = t0 + Duration::hours(h);
                let price = 100.0 + h as f64;
                FeatureRow {
                    ts,
                    price,
                    load: 50_000.0 + (h % 24) as f64,
                    wind: 10_000.0,
                    solar: 5_000.0,
                    renewables_share: 0.3,
                    calendar: ctx.fields(ts),
                    derived: set
                        .descriptors()
                        .iter()
                        .map(|d| match d.kind {
                            crate::features::FeatureKind::Lag { hours } => {
                                100.0 + (h - i64::from(hours)) as f64
                            }
                            crate::features::FeatureKind::RollingMean { .. } => 0.0,
                        })
                        .collect(),
                }
            })
            .collect()
    }

    #[test]
    fn second_hour_lag_reads_first_hour_predicted_median() {
        let set = set();
        let models = models(&set);
        let ctx = CalendarContext::germany();
        let hist = history(&set, 48);
        let last_price = hist.last().unwrap().price;
        let settings = ForecastSettings {
            horizon_hours: 3,
            profile_days: 28,
        };
        let out = Forecaster::new(&set, &ctx, &models, settings)
            .forecast(&hist)
            .unwrap();

        assert_eq!(out.len(), 3);
        let m1 = out[0].median().unwrap();
        let m2 = out[1].median().unwrap();
        let m3 = out[2].median().unwrap();
        // hour 1 lags the last actual; hours 2 and 3 lag the prior median
        assert_eq!(m1, last_price + 1.0);
        assert_eq!(m2, m1 + 1.0);
        assert_eq!(m3, m2 + 1.0);
        assert_eq!(out[1].ts, hist.last().unwrap().ts + Duration::hours(2));
    }

    #[test]
    fn fan_is_ascending_without_crossings() {
        let set = set();
        let models = models(&set);
        let ctx = CalendarContext::germany();
        let out = Forecaster::new(&set, &ctx, &models, ForecastSettings::default())
            .forecast(&history(&set, 48))
            .unwrap();
        assert_eq!(out.len(), 24);
        assert!(out.iter().all(|r| r.crossings().is_empty()));
        assert_eq!(out[0].values.len(), 3);
    }

    #[test]
    fn exogenous_proxy_is_same_hour_mean() {
        let set = set();
        let models = models(&set);
        let ctx = CalendarContext::new(chrono_tz::UTC, HolidayCalendar::None);
        let hist = history(&set, 72);
        let forecaster = Forecaster::new(&set, &ctx, &models, ForecastSettings::default());
        let profile = forecaster.exogenous_profile(&hist, hist.last().unwrap().ts);
        assert_eq!(profile.get(&(Quantity::Load, 5)), Some(&50_005.0));
        assert_eq!(profile.get(&(Quantity::Wind, 23)), Some(&10_000.0));
    }

    #[test]
    fn missing_median_fails() {
        let set = set();
        let only_q10 = QuantileModels::new(vec![Box::new(Echo {
            q: Quantile::from_percent(10).unwrap(),
            lag1_pos: 0,
            offset: 0.0,
            names: vec![],
        })]);
        let ctx = CalendarContext::germany();
        let err = Forecaster::new(&set, &ctx, &only_q10, ForecastSettings::default())
            .forecast(&history(&set, 5))
            .unwrap_err();
        assert!(matches!(err, ForecastError::MissingMedian));
    }

    #[test]
    fn empty_history_fails() {
        let set = set();
        let models = models(&set);
        let ctx = CalendarContext::germany();
        let err = Forecaster::new(&set, &ctx, &models, ForecastSettings::default())
            .forecast(&[])
            .unwrap_err();
        assert!(matches!(err, ForecastError::EmptyHistory));
    }

    #[test]
    fn crossings_are_flagged() {
        let q = |p| Quantile::from_percent(p).unwrap();
        let row = ForecastRow {
            ts: Utc::now(),
            values: vec![(q(10), 5.0), (q(50), 4.0), (q(90), 6.0)],
        };
        assert_eq!(row.crossings(), vec![(q(10), q(50))]);
    }

    #[test]
    fn next_hour_prediction_uses_row_inputs() {
        let set = set();
        let models = models(&set);
        let hist = history(&set, 10);
        let last = hist.last().unwrap();
        let out = predict_next_hour(last, &set, &models).unwrap();
        assert_eq!(out.ts, last.ts);
        // lag1 of the last row is price at t-1 = last.price - 1
        assert_eq!(out.median(), Some(last.price));
    }
}
