//! Pipeline configuration, loaded from a single TOML file.
//!
//! Every section has defaults, so an empty file (or no file) yields the
//! stock German setup. `validate()` catches the mistakes that would
//! otherwise only surface deep inside a stage.

use epfd_core::calendar::{CalendarContext, HolidayCalendar};
use epfd_core::data::{EntsoeSettings, OpsdSettings, SmardSettings};
use epfd_core::domain::{Quantity, Source};
use epfd_core::features::{FeatureSet, FeatureSpec};
use epfd_core::forecast::ForecastSettings;
use epfd_core::model::{LinearQuantileParams, Quantile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {detail}")]
    Io { path: PathBuf, detail: String },

    #[error("parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub calendar: CalendarConfig,
    pub features: FeatureSpec,
    pub precedence: PrecedenceConfig,
    pub model: ModelConfig,
    pub forecast: ForecastConfig,
    pub backtest: BacktestConfig,
    pub http: HttpConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub feature_table: PathBuf,
    pub artifacts_dir: PathBuf,
    pub database: PathBuf,
    pub forecast_csv: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            feature_table: PathBuf::from("data/features/hourly.parquet"),
            artifacts_dir: PathBuf::from("models/artifacts"),
            database: PathBuf::from("data/epfd.sqlite"),
            forecast_csv: PathBuf::from("models/artifacts/forecast_fan.csv"),
        }
    }
}

impl PathsConfig {
    pub fn metrics_path(&self) -> PathBuf {
        self.artifacts_dir.join("metrics_quantiles.json")
    }

    pub fn backtest_path(&self) -> PathBuf {
        self.artifacts_dir.join("backtest_quantile.json")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// IANA timezone name for local calendar fields.
    pub timezone: String,
    pub holidays: HolidayCalendar,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: "Europe/Berlin".to_string(),
            holidays: HolidayCalendar::Germany,
        }
    }
}

/// Source order per quantity, lowest precedence first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecedenceConfig {
    pub price: Vec<Source>,
    pub load: Vec<Source>,
    pub wind: Vec<Source>,
    pub solar: Vec<Source>,
}

impl Default for PrecedenceConfig {
    fn default() -> Self {
        Self {
            price: vec![Source::Opsd, Source::Entsoe],
            load: vec![Source::Opsd, Source::Smard],
            wind: vec![Source::Opsd, Source::Smard],
            solar: vec![Source::Opsd, Source::Smard],
        }
    }
}

impl PrecedenceConfig {
    pub fn order(&self, quantity: Quantity) -> &[Source] {
        match quantity {
            Quantity::Price => &self.price,
            Quantity::Load => &self.load,
            Quantity::Wind => &self.wind,
            Quantity::Solar => &self.solar,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Quantile levels in (0, 1) on the whole-percent grid.
    pub quantiles: Vec<f64>,
    pub n_splits: usize,
    /// Train on only the trailing N days of the feature table.
    pub train_window_days: Option<i64>,
    pub params: LinearQuantileParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            quantiles: Quantile::default_fan().iter().map(Quantile::level).collect(),
            n_splits: 5,
            train_window_days: None,
            params: LinearQuantileParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub horizon_hours: usize,
    /// Trailing days of the feature table handed to the forecaster.
    pub history_days: i64,
    pub profile_days: i64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 24,
            history_days: 180,
            profile_days: 28,
        }
    }
}

impl ForecastConfig {
    pub fn settings(&self) -> ForecastSettings {
        ForecastSettings {
            horizon_hours: self.horizon_hours,
            profile_days: self.profile_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub test_days: i64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self { test_days: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub smard: SmardSettings,
    pub entsoe: EntsoeSettings,
    pub opsd: OpsdSettings,
}

impl PipelineConfig {
    /// Load from a TOML file and validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `from_file` when the file exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let quantiles = self.quantiles()?;
        if !quantiles.contains(&Quantile::MEDIAN) {
            return Err(ConfigError::Invalid(
                "model.quantiles must include the median 0.5".into(),
            ));
        }
        if self.model.n_splits < 2 {
            return Err(ConfigError::Invalid(format!(
                "model.n_splits must be at least 2, got {}",
                self.model.n_splits
            )));
        }
        if self.model.train_window_days.is_some_and(|d| d <= 0) {
            return Err(ConfigError::Invalid("model.train_window_days must be positive".into()));
        }

        let f = &self.features;
        if f.lag_hours.contains(&0) {
            return Err(ConfigError::Invalid("features.lag_hours must be positive".into()));
        }
        if f.rolling_windows.contains(&0) {
            return Err(ConfigError::Invalid("features.rolling_windows must be positive".into()));
        }

        for q in Quantity::ALL {
            if self.precedence.order(q).is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "precedence.{} lists no sources",
                    q.key()
                )));
            }
        }

        if self.forecast.horizon_hours == 0 {
            return Err(ConfigError::Invalid("forecast.horizon_hours must be positive".into()));
        }
        if self.forecast.history_days <= 0 || self.forecast.profile_days <= 0 {
            return Err(ConfigError::Invalid(
                "forecast.history_days and forecast.profile_days must be positive".into(),
            ));
        }
        if self.backtest.test_days <= 0 {
            return Err(ConfigError::Invalid("backtest.test_days must be positive".into()));
        }

        self.calendar_context()?;
        Ok(())
    }

    /// Configured quantiles, ascending and deduplicated.
    pub fn quantiles(&self) -> Result<Vec<Quantile>, ConfigError> {
        if self.model.quantiles.is_empty() {
            return Err(ConfigError::Invalid("model.quantiles is empty".into()));
        }
        let mut out = self
            .model
            .quantiles
            .iter()
            .map(|&level| {
                Quantile::from_level(level).map_err(|e| ConfigError::Invalid(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        out.sort();
        out.dedup();
        Ok(out)
    }

    pub fn calendar_context(&self) -> Result<CalendarContext, ConfigError> {
        CalendarContext::from_tz_name(&self.calendar.timezone, self.calendar.holidays)
            .map_err(ConfigError::Invalid)
    }

    pub fn feature_set(&self) -> FeatureSet {
        FeatureSet::from_spec(&self.features)
    }

    /// Deterministic hash of the configuration, recorded alongside
    /// training metrics.
    pub fn config_hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = PipelineConfig::from_toml("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.quantiles().unwrap().len(), 19);
        assert_eq!(cfg.precedence.order(Quantity::Price), &[Source::Opsd, Source::Entsoe]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = PipelineConfig::from_toml(
            r#"
            [model]
            quantiles = [0.1, 0.5, 0.9]

            [features]
            lag_hours = [1, 24]

            [sources.smard]
            resolution = "quarterhour"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.quantiles().unwrap().len(), 3);
        assert_eq!(cfg.features.lag_hours, vec![1, 24]);
        assert_eq!(cfg.features.rolling_windows, vec![24, 168]);
        assert_eq!(cfg.model.n_splits, 5);
        assert_eq!(cfg.sources.smard.region, "DE");
    }

    #[test]
    fn quantiles_without_median_are_rejected() {
        let err = PipelineConfig::from_toml("[model]\nquantiles = [0.1, 0.9]").unwrap_err();
        assert!(err.to_string().contains("median"), "{err}");
    }

    #[test]
    fn off_grid_quantile_is_rejected() {
        let err = PipelineConfig::from_toml("[model]\nquantiles = [0.125, 0.5]").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = PipelineConfig::from_toml("[model]\nquantiles = [0.5, 1.0]").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_lag_and_empty_precedence_are_rejected() {
        assert!(PipelineConfig::from_toml("[features]\nlag_hours = [0]").is_err());
        assert!(PipelineConfig::from_toml("[precedence]\nload = []").is_err());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = PipelineConfig::from_toml("[calendar]\ntimezone = \"Mars/Olympus\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn config_hash_tracks_content() {
        let a = PipelineConfig::default();
        let mut b = a.clone();
        assert_eq!(a.config_hash(), b.config_hash());
        b.forecast.horizon_hours = 48;
        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        assert!(matches!(
            PipelineConfig::from_toml("[model\nquantiles = "),
            Err(ConfigError::Parse(_))
        ));
    }
}
