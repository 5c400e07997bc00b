//! Walk-forward validation: chronological train/test fold splitting and
//! per-fold quantile metrics.
//!
//! Folds have the shape of scikit-learn's `TimeSeriesSplit`: with `k`
//! splits over `n` rows the test size is `n / (k + 1)`, test windows are
//! the last `k` such blocks, and each train window is everything before
//! its test window. Rows are never shuffled.

use epfd_core::model::{
    mae, pinball_loss, rmse, LinearQuantileModel, LinearQuantileParams, ModelError, Quantile,
    QuantileRegressor,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Result types ────────────────────────────────────────────────────

/// Row index ranges of a single fold, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSpec {
    pub fold_index: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// Out-of-sample metrics for one fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub fold_index: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub mae: f64,
    pub rmse: f64,
    pub pinball: f64,
}

/// Walk-forward summary for one quantile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantileValidation {
    pub quantile: Quantile,
    pub folds: Vec<FoldMetrics>,
    pub mae: f64,
    pub rmse: f64,
    pub pinball: f64,
}

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("insufficient data: {rows} rows cannot form {n_splits} chronological splits")]
    InsufficientData { rows: usize, n_splits: usize },
    #[error("fit failed on fold {fold}: {source}")]
    FitFailed {
        fold: usize,
        #[source]
        source: ModelError,
    },
}

// ─── Fold creation ───────────────────────────────────────────────────

/// Create expanding-window folds over `total_rows` chronological rows.
///
/// - Fold 0: train = [0 .. n - k·s], test = next s rows
/// - Fold i: train grows by s rows, test = the following s rows
///
/// where s = n / (k + 1). The last fold ends at `total_rows`.
pub fn create_folds(total_rows: usize, n_splits: usize) -> Result<Vec<FoldSpec>, WalkForwardError> {
    let insufficient = WalkForwardError::InsufficientData {
        rows: total_rows,
        n_splits,
    };
    if n_splits < 2 || total_rows < n_splits + 1 {
        return Err(insufficient);
    }
    let test_size = total_rows / (n_splits + 1);
    let first_test = total_rows - n_splits * test_size;

    Ok((0..n_splits)
        .map(|i| {
            let test_start = first_test + i * test_size;
            FoldSpec {
                fold_index: i,
                train_start: 0,
                train_end: test_start,
                test_start,
                test_end: test_start + test_size,
            }
        })
        .collect())
}

// ─── Validation ──────────────────────────────────────────────────────

/// Fit on each fold's train window and score its test window.
pub fn validate_quantile(
    quantile: Quantile,
    feature_names: &[String],
    xs: &[Vec<f64>],
    ys: &[f64],
    folds: &[FoldSpec],
    params: &LinearQuantileParams,
) -> Result<QuantileValidation, WalkForwardError> {
    let mut results = Vec::with_capacity(folds.len());
    for fold in folds {
        let fail = |source| WalkForwardError::FitFailed {
            fold: fold.fold_index,
            source,
        };
        let model = LinearQuantileModel::fit(
            quantile,
            feature_names.to_vec(),
            &xs[fold.train_start..fold.train_end],
            &ys[fold.train_start..fold.train_end],
            params,
        )
        .map_err(fail)?;

        let y_true = &ys[fold.test_start..fold.test_end];
        let y_hat = xs[fold.test_start..fold.test_end]
            .iter()
            .map(|x| model.predict(x))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;

        let metrics = FoldMetrics {
            fold_index: fold.fold_index,
            train_rows: fold.train_end - fold.train_start,
            test_rows: y_true.len(),
            mae: mae(y_true, &y_hat),
            rmse: rmse(y_true, &y_hat),
            pinball: pinball_loss(quantile.level(), y_true, &y_hat),
        };
        tracing::debug!(
            quantile = %quantile,
            fold = metrics.fold_index,
            mae = metrics.mae,
            rmse = metrics.rmse,
            "fold scored"
        );
        results.push(metrics);
    }
    Ok(summarize(quantile, results))
}

fn summarize(quantile: Quantile, folds: Vec<FoldMetrics>) -> QuantileValidation {
    let n = folds.len() as f64;
    let mean = |f: fn(&FoldMetrics) -> f64| folds.iter().map(f).sum::<f64>() / n;
    QuantileValidation {
        quantile,
        mae: mean(|m| m.mae),
        rmse: mean(|m| m.rmse),
        pinball: mean(|m| m.pinball),
        folds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_match_time_series_split_shape() {
        // n = 12, k = 3 -> s = 3; tests at [3,6) [6,9) [9,12)
        let folds = create_folds(12, 3).unwrap();
        assert_eq!(folds.len(), 3);
        assert_eq!((folds[0].train_end, folds[0].test_start, folds[0].test_end), (3, 3, 6));
        assert_eq!((folds[2].train_end, folds[2].test_start, folds[2].test_end), (9, 9, 12));
    }

    #[test]
    fn remainder_goes_to_the_first_train_window() {
        // n = 14, k = 3 -> s = 3; first test starts at 14 - 9 = 5
        let folds = create_folds(14, 3).unwrap();
        assert_eq!(folds[0].train_end, 5);
        assert_eq!(folds.last().unwrap().test_end, 14);
    }

    #[test]
    fn train_windows_expand_and_tests_are_contiguous() {
        let folds = create_folds(1000, 5).unwrap();
        for pair in folds.windows(2) {
            assert!(pair[1].train_end > pair[0].train_end);
            assert_eq!(pair[1].test_start, pair[0].test_end);
        }
        for f in &folds {
            assert_eq!(f.train_start, 0);
            assert_eq!(f.train_end, f.test_start);
        }
    }

    #[test]
    fn too_few_rows_or_splits_fail() {
        assert!(matches!(
            create_folds(5, 5),
            Err(WalkForwardError::InsufficientData { rows: 5, n_splits: 5 })
        ));
        assert!(create_folds(100, 1).is_err());
        assert!(create_folds(6, 5).is_ok());
    }

    #[test]
    fn validation_reports_mean_fold_metrics() {
        let xs: Vec<Vec<f64>> = (0..120).map(|i| vec![i as f64 % 24.0]).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 10.0 + 2.0 * x[0]).collect();
        let folds = create_folds(xs.len(), 3).unwrap();
        let v = validate_quantile(
            Quantile::MEDIAN,
            &["hour".to_string()],
            &xs,
            &ys,
            &folds,
            &LinearQuantileParams::default(),
        )
        .unwrap();
        assert_eq!(v.folds.len(), 3);
        let mean_mae = v.folds.iter().map(|f| f.mae).sum::<f64>() / 3.0;
        assert!((v.mae - mean_mae).abs() < 1e-12);
        assert!(v.mae.is_finite() && v.rmse >= v.mae);
    }
}
