//! epfd core: domain types, source fetchers, reconciliation, features,
//! quantile models and the autoregressive forecaster.
//!
//! - Domain types (quantities, sources, hourly series)
//! - Fetchers for ENTSO-E, OPSD and SMARD with Parquet snapshots
//! - Reconciliation onto a contiguous hourly grid
//! - Calendar, lag and rolling-mean features free of lookahead
//! - Quantile regressors and their on-disk artifacts
//! - Multi-hour forecasting that feeds medians back as lags

pub mod calendar;
pub mod data;
pub mod domain;
pub mod features;
pub mod forecast;
pub mod model;
pub mod reconcile;
