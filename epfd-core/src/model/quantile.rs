//! Quantile levels on the whole-percent grid.

use super::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A target quantile, stored as an integer percent in 1..=99.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Quantile(u8);

impl Quantile {
    pub const MEDIAN: Quantile = Quantile(50);

    pub fn from_percent(percent: u8) -> Result<Self, ModelError> {
        if (1..=99).contains(&percent) {
            Ok(Self(percent))
        } else {
            Err(ModelError::InvalidQuantile(format!(
                "{percent}% is outside 1..=99"
            )))
        }
    }

    /// Parse a level such as 0.1; must sit on the whole-percent grid.
    pub fn from_level(level: f64) -> Result<Self, ModelError> {
        let scaled = level * 100.0;
        let rounded = scaled.round();
        if !level.is_finite() || (scaled - rounded).abs() > 1e-6 || !(1.0..=99.0).contains(&rounded)
        {
            return Err(ModelError::InvalidQuantile(format!(
                "{level} is not a whole-percent level in (0, 1)"
            )));
        }
        Ok(Self(rounded as u8))
    }

    pub fn level(&self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn percent(&self) -> u8 {
        self.0
    }

    /// Identifier used in artifact names and table columns, e.g. `q05`.
    pub fn id(&self) -> String {
        format!("q{:02}", self.0)
    }

    /// The default fan: 0.05 to 0.95 in steps of 0.05.
    pub fn default_fan() -> Vec<Quantile> {
        (1..=19).map(|k| Quantile(k * 5)).collect()
    }

    /// Mirror quantile, e.g. q10 → q90.
    pub fn complement(&self) -> Quantile {
        Quantile(100 - self.0)
    }
}

impl TryFrom<f64> for Quantile {
    type Error = ModelError;

    fn try_from(level: f64) -> Result<Self, Self::Error> {
        Quantile::from_level(level)
    }
}

impl From<Quantile> for f64 {
    fn from(q: Quantile) -> f64 {
        q.level()
    }
}

impl fmt::Display for Quantile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}
