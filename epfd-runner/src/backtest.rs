//! Hold-out backtest of the trained quantile set.
//!
//! Scores the trailing `test_days` of the feature table against the stored
//! artifacts: interval coverage for the widest symmetric quantile pair,
//! mean interval width, median MAE, and the empirical calibration curve
//! `P(y <= ŷ_q)` per quantile.

use crate::config::PipelineConfig;
use crate::feature_table::FeatureTable;
use crate::pipeline::PipelineError;
use chrono::Duration;
use epfd_core::features::{FeatureRow, FeatureSet};
use epfd_core::forecast::ForecastRow;
use epfd_core::model::{mae, ModelStore, Quantile, QuantileModels};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalScore {
    pub lower: Quantile,
    pub upper: Quantile,
    pub coverage: f64,
    pub expected_coverage: f64,
    pub mean_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub quantile: Quantile,
    /// Share of actuals at or below the predicted quantile.
    pub observed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub test_days: i64,
    pub rows: usize,
    pub interval: Option<IntervalScore>,
    pub mae_p50: Option<f64>,
    pub calibration: Vec<CalibrationPoint>,
    /// Rows where some adjacent quantile pair decreases.
    pub crossing_rows: usize,
}

/// Widest pair `(q, 1 - q)` with both ends present, `q` below the median.
pub fn outer_interval(quantiles: &[Quantile]) -> Option<(Quantile, Quantile)> {
    quantiles
        .iter()
        .copied()
        .filter(|q| *q < Quantile::MEDIAN && quantiles.contains(&q.complement()))
        .min()
        .map(|q| (q, q.complement()))
}

/// Score the trailing `test_days` of `rows`.
pub fn evaluate_holdout(
    rows: &[FeatureRow],
    set: &FeatureSet,
    models: &QuantileModels,
    test_days: i64,
) -> Result<BacktestReport, PipelineError> {
    let Some(last) = rows.last().map(|r| r.ts) else {
        return Err(PipelineError::DataQuality("no rows to backtest".into()));
    };
    let cutoff = last - Duration::days(test_days);
    let test: Vec<&FeatureRow> = rows.iter().filter(|r| r.ts > cutoff).collect();

    let preds = test
        .iter()
        .map(|r| {
            Ok(ForecastRow {
                ts: r.ts,
                values: models.predict_all(&r.input_vector(set))?,
            })
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;
    let actual: Vec<f64> = test.iter().map(|r| r.target(set)).collect();
    let n = actual.len() as f64;

    let quantiles = models.quantiles();
    let column = |q: Quantile| -> Vec<f64> { preds.iter().filter_map(|p| p.get(q)).collect() };

    let interval = outer_interval(&quantiles).map(|(lower, upper)| {
        let lo = column(lower);
        let hi = column(upper);
        let inside = actual
            .iter()
            .zip(lo.iter().zip(&hi))
            .filter(|(y, (l, h))| *y >= *l && *y <= *h)
            .count();
        IntervalScore {
            lower,
            upper,
            coverage: inside as f64 / n,
            expected_coverage: upper.level() - lower.level(),
            mean_width: hi.iter().zip(&lo).map(|(h, l)| h - l).sum::<f64>() / n,
        }
    });

    let mae_p50 = quantiles
        .contains(&Quantile::MEDIAN)
        .then(|| mae(&actual, &column(Quantile::MEDIAN)));

    let calibration = quantiles
        .iter()
        .map(|&q| {
            let below = actual.iter().zip(column(q)).filter(|(y, p)| **y <= *p).count();
            CalibrationPoint {
                quantile: q,
                observed: below as f64 / n,
            }
        })
        .collect();

    let crossing_rows = preds.iter().filter(|p| !p.crossings().is_empty()).count();

    Ok(BacktestReport {
        test_days,
        rows: test.len(),
        interval,
        mae_p50,
        calibration,
        crossing_rows,
    })
}

pub fn run_backtest(config: &PipelineConfig) -> Result<BacktestReport, PipelineError> {
    let set = config.feature_set();
    let rows = FeatureTable::new(&config.paths.feature_table).read(&set)?;
    let models = ModelStore::new(&config.paths.artifacts_dir)
        .load_all(&config.quantiles()?, &set.input_names())?;
    let report = evaluate_holdout(&rows, &set, &models, config.backtest.test_days)?;

    if let Some(iv) = &report.interval {
        tracing::info!(
            coverage = iv.coverage,
            expected = iv.expected_coverage,
            width = iv.mean_width,
            "backtest interval"
        );
    }
    if report.crossing_rows > 0 {
        tracing::warn!(rows = report.crossing_rows, "calibration warning: quantile crossings in backtest");
    }

    let path = config.paths.backtest_path();
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| PipelineError::Io(format!("backtest serialization: {e}")))?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::Io(format!("create dir: {e}")))?;
    }
    std::fs::write(&path, json)
        .map_err(|e| PipelineError::Io(format!("write {}: {e}", path.display())))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use epfd_core::calendar::CalendarContext;
    use epfd_core::features::FeatureSpec;
    use epfd_core::model::{ModelError, QuantileRegressor};

    /// Predicts price shifted by a fixed offset (reads the price input).
    struct Offset(Quantile, f64, Vec<String>);

    impl QuantileRegressor for Offset {
        fn quantile(&self) -> Quantile {
            self.0
        }
        fn feature_names(&self) -> &[String] {
            &self.2
        }
        fn predict(&self, x: &[f64]) -> Result<f64, ModelError> {
            Ok(x[0] + self.1)
        }
    }

    fn q(p: u8) -> Quantile {
        Quantile::from_percent(p).unwrap()
    }

    fn set() -> FeatureSet {
        FeatureSet::from_spec(&FeatureSpec {
            lag_drivers: vec![],
            lag_hours: vec![],
            rolling_windows: vec![],
        })
    }

    fn rows(n: i64) -> Vec<FeatureRow> {
        let ctx = CalendarContext::germany();
        let t0 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|h| {
                let ts = t0 + Duration::hours(h);
                // actual price; the load input carries the "prediction" base
                FeatureRow {
                    ts,
                    price: 100.0,
                    load: if h % 2 == 0 { 95.0 } else { 101.0 },
                    wind: 0.0,
                    solar: 0.0,
                    renewables_share: 0.0,
                    calendar: ctx.fields(ts),
                    derived: vec![],
                }
            })
            .collect()
    }

    #[test]
    fn outer_interval_picks_widest_symmetric_pair() {
        assert_eq!(outer_interval(&[q(5), q(10), q(50), q(90)]), Some((q(10), q(90))));
        assert_eq!(outer_interval(&[q(50)]), None);
    }

    #[test]
    fn coverage_width_and_calibration() {
        let set = set();
        // first input is load: 95 or 101 alternating
        assert_eq!(set.input_names()[0], "load_mw");
        let names = set.input_names();
        let models = QuantileModels::new(vec![
            Box::new(Offset(q(10), -2.0, names.clone())),
            Box::new(Offset(q(50), 0.0, names.clone())),
            Box::new(Offset(q(90), 2.0, names)),
        ]);
        let report = evaluate_holdout(&rows(24 * 3), &set, &models, 1).unwrap();
        assert_eq!(report.rows, 24);

        let iv = report.interval.unwrap();
        // [93, 97] misses 100; [99, 103] covers it
        assert!((iv.coverage - 0.5).abs() < 1e-12);
        assert!((iv.expected_coverage - 0.8).abs() < 1e-12);
        assert!((iv.mean_width - 4.0).abs() < 1e-12);
        // |100 - 95| and |100 - 101| alternate
        assert!((report.mae_p50.unwrap() - 3.0).abs() < 1e-12);

        let cal: Vec<f64> = report.calibration.iter().map(|c| c.observed).collect();
        assert_eq!(cal, vec![0.0, 0.5, 0.5]);
        assert_eq!(report.crossing_rows, 0);
    }
}
