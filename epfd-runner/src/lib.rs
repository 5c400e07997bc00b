//! epfd runner: the pipeline stages over `epfd-core`.
//!
//! - TOML configuration with stock German defaults
//! - Fetch stage merging source payloads into snapshots
//! - Feature stage and the Parquet feature table
//! - Walk-forward validation and per-quantile training
//! - Autoregressive forecast export and holdout backtest
//! - SQLite store: migrations, upserts, data-quality checks, serving reads

pub mod backtest;
pub mod config;
pub mod feature_stage;
pub mod feature_table;
pub mod fetch;
pub mod forecast_stage;
pub mod pipeline;
pub mod store;
pub mod train;
pub mod walk_forward;

pub use backtest::{run_backtest, BacktestReport};
pub use config::{ConfigError, PipelineConfig};
pub use feature_stage::{run_feature_stage, FeatureStageSummary};
pub use feature_table::{FeatureTable, FeatureTableError};
pub use fetch::{run_fetch, FetchOptions, FetchSummary};
pub use forecast_stage::{predict_latest, run_forecast, ForecastOutcome};
pub use pipeline::{
    open_store, run_load_features, run_migrate, run_pipeline, run_quality_checks,
    run_save_forecast, PipelineError, PipelineSummary, RunOptions,
};
pub use store::{QualityReport, Store, StoreError, StoredFeature, StoredPrediction};
pub use train::{run_training, TrainOutcome, TrainingReport};
pub use walk_forward::{create_folds, FoldSpec, WalkForwardError};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_is_send_sync() {
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
    }

    #[test]
    fn reports_are_send_sync() {
        assert_send::<TrainingReport>();
        assert_sync::<TrainingReport>();
        assert_send::<BacktestReport>();
        assert_sync::<BacktestReport>();
        assert_send::<StoredPrediction>();
        assert_sync::<StoredPrediction>();
    }

    #[test]
    fn errors_are_send_sync() {
        assert_send::<PipelineError>();
        assert_sync::<PipelineError>();
    }

    #[test]
    fn store_is_send() {
        assert_send::<Store>();
    }
}
