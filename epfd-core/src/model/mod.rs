//! Per-quantile regression models and their artifacts.
//!
//! Models are opaque behind [`QuantileRegressor`]: the forecaster only
//! needs a quantile level, the feature names the model was trained on, and
//! a prediction for one input vector.

pub mod linear;
pub mod metrics;
pub mod quantile;
pub mod store;

pub use linear::{LinearQuantileModel, LinearQuantileParams};
pub use metrics::{empirical_quantile, mae, pinball_loss, rmse};
pub use quantile::Quantile;
pub use store::ModelStore;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid quantile: {0}")]
    InvalidQuantile(String),

    #[error("missing model artifact for {quantile} at {}; run `train` first", path.display())]
    MissingArtifact { quantile: Quantile, path: PathBuf },

    #[error("artifact for {quantile} was trained on different features: {detail}")]
    FeatureMismatch { quantile: Quantile, detail: String },

    #[error("input has {got} features, model expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot train on an empty data set")]
    EmptyTrainingSet,

    #[error("non-finite value in training data at row {row}")]
    NonFiniteInput { row: usize },

    #[error("no model for the median quantile")]
    MissingMedian,

    #[error("artifact I/O error: {0}")]
    Io(String),

    #[error("artifact serialization error: {0}")]
    Serialization(String),
}

/// A fitted model for one target quantile.
pub trait QuantileRegressor: Send + Sync {
    fn quantile(&self) -> Quantile;

    /// Input names, in the order `predict` expects them.
    fn feature_names(&self) -> &[String];

    fn predict(&self, x: &[f64]) -> Result<f64, ModelError>;
}

/// Loaded models for a set of quantiles, ascending by level.
pub struct QuantileModels {
    models: Vec<Box<dyn QuantileRegressor>>,
}

impl QuantileModels {
    pub fn new(mut models: Vec<Box<dyn QuantileRegressor>>) -> Self {
        models.sort_by_key(|m| m.quantile());
        models.dedup_by_key(|m| m.quantile());
        Self { models }
    }

    pub fn quantiles(&self) -> Vec<Quantile> {
        self.models.iter().map(|m| m.quantile()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn median(&self) -> Option<&dyn QuantileRegressor> {
        self.models
            .iter()
            .find(|m| m.quantile() == Quantile::MEDIAN)
            .map(|m| m.as_ref())
    }

    /// Predict every quantile for one input vector, ascending by level.
    pub fn predict_all(&self, x: &[f64]) -> Result<Vec<(Quantile, f64)>, ModelError> {
        self.models
            .iter()
            .map(|m| Ok((m.quantile(), m.predict(x)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Const(Quantile, f64, Vec<String>);

    impl QuantileRegressor for Const {
        fn quantile(&self) -> Quantile {
            self.0
        }
        fn feature_names(&self) -> &[String] {
            &self.2
        }
        fn predict(&self, _x: &[f64]) -> Result<f64, ModelError> {
            Ok(self.1)
        }
    }

    fn q(p: u8) -> Quantile {
        Quantile::from_percent(p).unwrap()
    }

    #[test]
    fn models_are_sorted_and_median_found() {
        let set = QuantileModels::new(vec![
            Box::new(Const(q(90), 3.0, vec![])),
            Box::new(Const(q(10), 1.0, vec![])),
            Box::new(Const(q(50), 2.0, vec![])),
        ]);
        assert_eq!(set.quantiles(), vec![q(10), q(50), q(90)]);
        assert_eq!(set.median().unwrap().predict(&[]).unwrap(), 2.0);
        let fan = set.predict_all(&[]).unwrap();
        assert_eq!(fan[2], (q(90), 3.0));
    }

    #[test]
    fn no_median_is_detected() {
        let set = QuantileModels::new(vec![Box::new(Const(q(10), 1.0, vec![]))]);
        assert!(set.median().is_none());
    }
}
