//! Read-only HTTP API over the store and the latest trained models.
//!
//! - `GET /health`
//! - `GET /predictions/next?hours=N`: stored forecasts from now on
//! - `GET /predict`: one-step prediction from the newest feature row

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use epfd_core::model::ModelError;
use epfd_runner::{open_store, predict_latest, FeatureTableError, PipelineConfig, PipelineError, StoredPrediction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const DEFAULT_HOURS: u32 = 24;
const MAX_HOURS: u32 = 24 * 14;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
}

#[derive(Debug, Deserialize)]
pub struct NextParams {
    hours: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct NextResponse {
    pub hours: u32,
    pub predictions: Vec<StoredPrediction>,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub latest_timestamp: DateTime<Utc>,
    pub forecast_next_hour: BTreeMap<String, f64>,
}

/// Error body `{"error": "..."}` with a status derived from the cause.
pub struct ApiError(StatusCode, String);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Model(ModelError::MissingArtifact { .. })
            | PipelineError::FeatureTable(FeatureTableError::Missing { .. })
            | PipelineError::EmptyFeatureTable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predictions/next", get(next_predictions))
        .route("/predict", get(predict))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn next_predictions(
    State(state): State<AppState>,
    Query(params): Query<NextParams>,
) -> Result<Json<NextResponse>, ApiError> {
    let hours = params.hours.unwrap_or(DEFAULT_HOURS);
    if hours == 0 || hours > MAX_HOURS {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("hours must be between 1 and {MAX_HOURS}"),
        ));
    }
    let config = state.config.clone();
    let predictions = blocking(move || {
        let store = open_store(&config)?;
        Ok(store.next_predictions(Utc::now(), hours)?)
    })
    .await?;
    Ok(Json(NextResponse { hours, predictions }))
}

async fn predict(State(state): State<AppState>) -> Result<Json<PredictResponse>, ApiError> {
    let config = state.config.clone();
    let row = blocking(move || predict_latest(&config)).await?;
    Ok(Json(PredictResponse {
        latest_timestamp: row.ts,
        forecast_next_hour: row.values.iter().map(|(q, v)| (q.id(), *v)).collect(),
    }))
}

/// SQLite and model loading are synchronous.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, format!("task failed: {e}")))?
        .map_err(ApiError::from)
}

pub async fn serve(config: PipelineConfig, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(AppState {
        config: Arc::new(config),
    });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("serving forecasts on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};
    use epfd_core::forecast::ForecastRow;
    use epfd_core::model::Quantile;

    async fn spawn(config: PipelineConfig) -> String {
        let app = router(AppState {
            config: Arc::new(config),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config_in(dir: &std::path::Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.paths.database = dir.join("epfd.sqlite");
        config.paths.feature_table = dir.join("hourly.parquet");
        config.paths.artifacts_dir = dir.join("artifacts");
        config
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn(config_in(dir.path())).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn next_predictions_reads_future_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let now = Utc::now().with_minute(0).unwrap().with_second(0).unwrap().with_nanosecond(0).unwrap();
        let rows: Vec<ForecastRow> = (1..=30)
            .map(|h| ForecastRow {
                ts: now + Duration::hours(h),
                values: vec![(Quantile::MEDIAN, h as f64)],
            })
            .collect();
        open_store(&config).unwrap().upsert_predictions(&rows).unwrap();

        let base = spawn(config).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/predictions/next?hours=6"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let preds = body["predictions"].as_array().unwrap();
        assert_eq!(preds.len(), 6);
        assert_eq!(preds[0]["y_p50"], 1.0);

        let resp = reqwest::get(format!("{base}/predictions/next?hours=0")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn predict_without_artifacts_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn(config_in(dir.path())).await;
        let resp = reqwest::get(format!("{base}/predict")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }
}
