//! Web server module for thermolog.
//!
//! Read-only JSON API over the query aggregator. Rendering is left to
//! clients; every response allows any origin.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::config::ConfigSummary;
use crate::storage::{DEFAULT_RANGE_HOURS, QueryAggregator, QueryError};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: QueryAggregator,
    pub config: ConfigSummary,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

/// Error body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Query parameters for the range API.
///
/// Kept as text so malformed values get a JSON 400 instead of the
/// extractor's plain-text rejection.
#[derive(Debug, Deserialize)]
pub struct DataQueryParams {
    pub hours: Option<String>,
}

fn parse_hours(raw: Option<&str>) -> Result<u32, QueryError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(DEFAULT_RANGE_HOURS),
        Some(s) => s.parse::<u32>().map_err(|_| {
            QueryError::InvalidRange(format!("hours must be a positive integer, got '{s}'"))
        }),
    }
}

fn error_response(err: QueryError) -> Response {
    let status = match err {
        QueryError::InvalidRange(_) => StatusCode::BAD_REQUEST,
        QueryError::Storage(_) => {
            tracing::error!(error = %err, "Query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/latest", get(latest_handler))
        .route("/api/data", get(data_handler))
        .route("/api/config", get(config_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness probe that checks database availability.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.aggregator.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Latest snapshot across the three tables.
async fn latest_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.aggregator.latest().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

/// Composite records for the last `hours` hours (default 24).
async fn data_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DataQueryParams>,
) -> Response {
    let hours = match parse_hours(params.hours.as_deref()) {
        Ok(h) => h,
        Err(e) => return error_response(e),
    };
    match state.aggregator.range(hours).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => error_response(e),
    }
}

/// Configuration summary.
async fn config_handler(State(state): State<Arc<AppState>>) -> Json<ConfigSummary> {
    Json(state.config.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::storage::{CycleReadings, StorageBuilder, StorageHandles, storage_key};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{Duration, Utc};
    use http_body_util::BodyExt;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    async fn setup() -> (Router, StorageHandles, TempDir) {
        let dir = tempdir().unwrap();
        let handles = StorageBuilder::new(dir.path().join("server.db"))
            .build()
            .await
            .unwrap();
        let router = create_router(AppState {
            aggregator: handles.aggregator.clone(),
            config: AppConfig::default().summary(),
        });
        (router, handles, dir)
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse_hours(None).unwrap(), DEFAULT_RANGE_HOURS);
        assert_eq!(parse_hours(Some("6")).unwrap(), 6);
        assert!(parse_hours(Some("six")).is_err());
        assert!(parse_hours(Some("-1")).is_err());
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (router, handles, _dir) = setup().await;

        let (status, body) = get_json(&router, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = get_json(&router, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["db"], "ready");

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_and_data() {
        let (router, handles, _dir) = setup().await;

        let mut cycle = CycleReadings::new(Utc::now() - Duration::minutes(5));
        cycle.set_cpu_temp(44.5);
        cycle.push_storage("/dev/nvme0n1", Some("Fake NVMe".into()), 37.0);
        handles.writer.write_cycle(cycle).await.unwrap();

        let (status, latest) = get_json(&router, "/api/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(latest["core"]["cpu_temp"], 44.5);
        assert_eq!(latest["storage_devices"][0]["device_name"], "Fake NVMe");

        let (status, data) = get_json(&router, "/api/data?hours=1").await;
        assert_eq!(status, StatusCode::OK);
        let records = data.as_array().unwrap();
        assert_eq!(records.len(), 1);
        let entry = &records[0][storage_key("/dev/nvme0n1")];
        assert_eq!(entry["temperature"], 37.0);
        assert_eq!(entry["device_path"], "/dev/nvme0n1");

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_data_rejects_bad_hours() {
        let (router, handles, _dir) = setup().await;

        let (status, body) = get_json(&router, "/api/data?hours=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("hours"));

        let (status, _) = get_json(&router, "/api/data?hours=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_config_endpoint() {
        let (router, handles, _dir) = setup().await;

        let (status, body) = get_json(&router, "/api/config").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["interval_minutes"], 5);
        assert_eq!(body["sensors"]["cpu_temp"], true);

        handles.shutdown().await.unwrap();
    }
}
