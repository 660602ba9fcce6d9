//! HTTP routes and handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::error;

use floodgate_engine::EngineError;
use floodgate_service::{LimiterService, ServiceError};

/// Body of a `POST /api/v1/limit` request.
#[derive(Debug, Deserialize)]
pub struct LimitArgs {
    /// Bucket key (tenant, IP, route, ...).
    pub key: String,
    /// Maximum tokens the bucket holds.
    pub capacity: i64,
    /// Refill interval, in `unit`s.
    pub interval: i32,
    /// Time unit: "s", "ms", or "us".
    pub unit: String,
}

/// Builds the application router.
pub fn router(service: Arc<LimiterService>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/limit", post(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health() -> &'static str {
    "OK"
}

async fn limit(
    State(service): State<Arc<LimiterService>>,
    Json(args): Json<LimitArgs>,
) -> Response {
    match service.limit(&args.key, args.capacity, args.interval, &args.unit).await {
        Ok(verdict) => (StatusCode::OK, verdict.as_str()).into_response(),
        Err(err) => {
            let status = match &err {
                ServiceError::Engine { source: EngineError::ShuttingDown } => {
                    StatusCode::SERVICE_UNAVAILABLE
                },
                ServiceError::Engine { source: EngineError::Callback { .. } } => {
                    error!(key = %args.key, error = %err, "rate limit computation failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                },
                // Validation failures, including an empty key.
                _ => StatusCode::BAD_REQUEST,
            };
            (status, err.to_string()).into_response()
        },
    }
}
