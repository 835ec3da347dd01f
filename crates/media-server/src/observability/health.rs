//! Health endpoints for the media server.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (is the worker pool up and accepting sessions?)
//! - `GET /status` - Worker pool status as JSON
//!
//! The `/metrics` endpoint is served next to these from `main`.

use crate::actors::ActorMetrics;
use crate::pool::{WorkerPool, WorkerStatus};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness of the media server.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    /// True once the worker pool is initialized and the signaling listener is bound.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (shutdown, worker death).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// State behind `GET /status`.
pub struct StatusState {
    pub pool: Arc<WorkerPool>,
    pub actor_metrics: Arc<ActorMetrics>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    active_connections: usize,
    workers: Vec<WorkerStatus>,
}

/// Router exposing worker assignments and liveness.
pub fn status_router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .with_state(state)
}

async fn status_handler(State(state): State<Arc<StatusState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        active_connections: state.actor_metrics.connection_count(),
        workers: state.pool.status(),
    })
}
