//! Linear quantile regression fitted by subgradient descent on the
//! pinball loss.
//!
//! Inputs are standardised with the training means and scales, which are
//! stored in the artifact so prediction applies the identical transform.
//! The intercept starts at the empirical target quantile, so an untrained
//! (zero-epoch) model already predicts the unconditional quantile.

use super::metrics::empirical_quantile;
use super::{ModelError, Quantile, QuantileRegressor};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearQuantileParams {
    /// Base step size, relative to the target's spread.
    pub learning_rate: f64,
    pub epochs: usize,
    /// L2 penalty on the (standardised) weights.
    pub l2: f64,
}

impl Default for LinearQuantileParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            epochs: 300,
            l2: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearQuantileModel {
    pub quantile: Quantile,
    pub feature_names: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub trained_rows: usize,
}

impl LinearQuantileModel {
    /// Fit on row-major `xs` with targets `ys`.
    pub fn fit(
        quantile: Quantile,
        feature_names: Vec<String>,
        xs: &[Vec<f64>],
        ys: &[f64],
        params: &LinearQuantileParams,
    ) -> Result<Self, ModelError> {
        let n = xs.len().min(ys.len());
        if n == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        let p = feature_names.len();
        for (row, (x, y)) in xs.iter().zip(ys).enumerate() {
            if x.len() != p {
                return Err(ModelError::DimensionMismatch {
                    expected: p,
                    got: x.len(),
                });
            }
            if !y.is_finite() || x.iter().any(|v| !v.is_finite()) {
                return Err(ModelError::NonFiniteInput { row });
            }
        }

        let (means, scales) = standardisation(&xs[..n], p);
        let z: Vec<Vec<f64>> = xs[..n]
            .iter()
            .map(|x| standardise(x, &means, &scales))
            .collect();
        let ys = &ys[..n];

        let level = quantile.level();
        let mut intercept = empirical_quantile(ys, level).unwrap_or(0.0);
        let spread = target_spread(ys);
        let mut weights = vec![0.0; p];
        let mut grad = vec![0.0; p];

        for epoch in 0..params.epochs {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_b = 0.0;
            for (zi, yi) in z.iter().zip(ys) {
                let pred = intercept + dot(&weights, zi);
                // d(pinball)/d(pred)
                let g = if yi > &pred {
                    -level
                } else if yi < &pred {
                    1.0 - level
                } else {
                    0.0
                };
                grad_b += g;
                for (gj, zij) in grad.iter_mut().zip(zi) {
                    *gj += g * zij;
                }
            }
            let step = params.learning_rate * spread / (1.0 + epoch as f64).sqrt();
            let inv_n = 1.0 / n as f64;
            for (w, gj) in weights.iter_mut().zip(&grad) {
                *w -= step * (gj * inv_n + params.l2 * *w);
            }
            intercept -= step * grad_b * inv_n;
        }

        tracing::debug!(
            quantile = %quantile,
            rows = n,
            features = p,
            epochs = params.epochs,
            "fitted linear quantile model"
        );

        Ok(Self {
            quantile,
            feature_names,
            means,
            scales,
            weights,
            intercept,
            trained_rows: n,
        })
    }
}

impl QuantileRegressor for LinearQuantileModel {
    fn quantile(&self) -> Quantile {
        self.quantile
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, x: &[f64]) -> Result<f64, ModelError> {
        if x.len() != self.weights.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.weights.len(),
                got: x.len(),
            });
        }
        let z = standardise(x, &self.means, &self.scales);
        Ok(self.intercept + dot(&self.weights, &z))
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn standardise(x: &[f64], means: &[f64], scales: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(means.iter().zip(scales))
        .map(|(v, (m, s))| (v - m) / s)
        .collect()
}

/// Column means and standard deviations; constant columns get scale 1.
fn standardisation(xs: &[Vec<f64>], p: usize) -> (Vec<f64>, Vec<f64>) {
    let n = xs.len() as f64;
    let mut means = vec![0.0; p];
    for x in xs {
        for (m, v) in means.iter_mut().zip(x) {
            *m += v / n;
        }
    }
    let mut vars = vec![0.0; p];
    for x in xs {
        for ((s, v), m) in vars.iter_mut().zip(x).zip(&means) {
            *s += (v - m) * (v - m) / n;
        }
    }
    let scales = vars
        .into_iter()
        .map(|v| {
            let sd = v.sqrt();
            if sd > 1e-12 {
                sd
            } else {
                1.0
            }
        })
        .collect();
    (means, scales)
}

/// Inter-quantile range (10-90) of the target, falling back to 1.
fn target_spread(ys: &[f64]) -> f64 {
    match (empirical_quantile(ys, 0.1), empirical_quantile(ys, 0.9)) {
        (Some(lo), Some(hi)) if hi - lo > 1e-9 => hi - lo,
        _ => 1.0,
    }
}
