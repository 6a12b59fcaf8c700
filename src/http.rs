//! Local HTTP control surface for the monitor
//!
//! Lets a host process (tray app, status bar, browser page) drive the monitor
//! with typed request/response calls instead of shared state. Health and
//! status are plain JSON.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{PostureError, Result};
use crate::monitor::{CheckOutcome, Monitor, MonitorStatus};

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct ControlState {
    pub monitor: Arc<Monitor>,
    pub default_interval: Duration,
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub running: bool,
    pub busy: bool,
    pub status: MonitorStatus,
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StartBody {
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeBody {
    image: String,
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/check", post(check))
        .route("/analyze", post(analyze))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: ControlState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PostureError::Control {
            message: format!("Failed to bind {}: {}", addr, e),
        })?;
    let local = listener.local_addr()?;
    tracing::info!("Control surface listening on http://{}", local);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| PostureError::Control {
            message: e.to_string(),
        })
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<ControlState>) -> Json<StatusBody> {
    Json(status_body(&state.monitor))
}

fn status_body(monitor: &Monitor) -> StatusBody {
    StatusBody {
        running: monitor.is_running(),
        busy: monitor.is_busy(),
        status: monitor.status(),
        interval_ms: monitor
            .interval()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
    }
}

fn outcome_response(outcome: CheckOutcome) -> Response {
    match outcome {
        CheckOutcome::Completed(verdict) => (StatusCode::OK, Json(verdict)).into_response(),
        CheckOutcome::Skipped => {
            (StatusCode::CONFLICT, Json(json!({ "skipped": "busy" }))).into_response()
        }
    }
}

async fn check(State(state): State<ControlState>) -> Response {
    outcome_response(state.monitor.run_one_check().await)
}

async fn analyze(State(state): State<ControlState>, Json(body): Json<AnalyzeBody>) -> Response {
    outcome_response(state.monitor.analyze_data_url(&body.image).await)
}

async fn start(State(state): State<ControlState>, body: Bytes) -> Response {
    let parsed: StartBody = if body.iter().all(u8::is_ascii_whitespace) {
        StartBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(b) => b,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
                    .into_response();
            }
        }
    };
    let interval = parsed
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or(state.default_interval);

    match state.monitor.start(interval) {
        Ok(()) => (StatusCode::OK, Json(status_body(&state.monitor))).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn stop(State(state): State<ControlState>) -> Json<StatusBody> {
    state.monitor.stop();
    Json(status_body(&state.monitor))
}
