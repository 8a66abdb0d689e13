//! HTTP API over the coordinator.
//!
//! - GET  /v1/objects/{name}?size=&offset=
//! - GET  /v1/stats
//! - PUT  /v1/mode
//! - POST /v1/stats/reset
//! - GET  /health
//! - GET  /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::cache::coordinator::{Coordinator, CoordinatorSnapshot};
use crate::cache::object::OperatingMode;
use crate::error::TierError;

/// Application state shared across handlers.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/objects/{*name}", get(read_object))
        .route("/v1/stats", get(stats))
        .route("/v1/stats/reset", post(reset_stats))
        .route("/v1/mode", put(set_mode))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Byte range of a read. A missing `size` reads to the end of the object.
#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModeRequest {
    pub mode: OperatingMode,
}

#[derive(Debug, Serialize)]
pub struct ModeResponse {
    pub mode: OperatingMode,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub mode: OperatingMode,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for TierError {
    fn into_response(self) -> Response {
        let status = match &self {
            TierError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TierError::NotFound(_) => StatusCode::NOT_FOUND,
            TierError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TierError::CodecFailure(_) | TierError::ConfigInvalid(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

// ─── Handlers ──────────────────────────────────────────────────────────────

async fn read_object(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(range): Query<ReadQuery>,
) -> Result<Response, TierError> {
    let request_id = Uuid::new_v4().to_string();
    let offset = range.offset.unwrap_or(0);
    let size = range.size.unwrap_or(u64::MAX - offset);
    let span = info_span!("read", %request_id, name = %name, size, offset);

    let data = state
        .coordinator
        .get(&name, size, offset)
        .instrument(span)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::HeaderName::from_static("x-request-id"), request_id),
        ],
        data,
    )
        .into_response())
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<CoordinatorSnapshot> {
    Json(state.coordinator.snapshot())
}

async fn reset_stats(State(state): State<Arc<AppState>>) -> StatusCode {
    state.coordinator.reset_stats();
    StatusCode::NO_CONTENT
}

async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModeRequest>,
) -> Json<ModeResponse> {
    state.coordinator.set_mode(req.mode);
    info!(mode = %req.mode, "Mode changed via API");
    Json(ModeResponse { mode: req.mode })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        mode: state.coordinator.mode(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.coordinator.metrics().encode(),
    )
}
