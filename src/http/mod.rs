use std::sync::atomic::Ordering as AtomicOrdering;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::Utc;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    assert!(
        state.start_time.elapsed() < Duration::from_secs(86_400),
        "Application uptime exceeds 24 hours before router creation"
    );

    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let uptime = state.start_time.elapsed().as_secs();
    let response = HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    };
    Ok(Json(response))
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    let last_poll_at = state.last_poll_at.load(AtomicOrdering::SeqCst);
    if last_poll_at <= 0 {
        return Err(HttpError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Update poller has not completed a cycle yet".to_string(),
        ));
    }
    let since_last_poll = u64::try_from(Utc::now().timestamp() - last_poll_at).unwrap_or_default();
    if since_last_poll > state.staleness_threshold.as_secs() {
        return Err(HttpError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Update poller stalled for {since_last_poll}s"),
        ));
    }

    let backend_timeout_ms = u64::try_from(state.backend_timeout.as_millis()).map_err(|_| {
        HttpError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Backend timeout exceeds u64 bounds".to_string(),
        )
    })?;

    let response = ReadyResponse {
        status: "ready",
        last_update_id: state.last_update_id.load(AtomicOrdering::SeqCst),
        seconds_since_last_poll: since_last_poll,
        active_drafts: state.service.active_drafts(),
        backend_timeout_ms,
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    last_update_id: u64,
    seconds_since_last_poll: u64,
    active_drafts: u64,
    backend_timeout_ms: u64,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}
