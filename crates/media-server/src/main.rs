//! Media Server
//!
//! WebSocket signaling front end for the proctoring media plane.
//!
//! # Servers
//!
//! - WebSocket signaling at `GET /signal` (default: 0.0.0.0:9099)
//! - HTTP server for health, status and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Start the worker pool (exit non-zero on failure)
//! 4. Arm the worker fault monitor (exit after the grace delay on worker death)
//! 5. Start the health server, then the signaling server
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::config::init_tracing;
use media_server::actors::ActorMetrics;
use media_server::config::Config;
use media_server::engine::default_media_codecs;
use media_server::observability::metrics::init_metrics_recorder;
use media_server::observability::{health_router, status_router, HealthState, StatusState};
use media_server::pool::WorkerPool;
use media_server::signaling::{signaling_router, SignalingState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Grace period for in-flight connections to tear down after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    init_tracing(&config.observability, "media_server=info,tower_http=info")?;

    info!("Starting Media Server");
    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        worker_count = config.worker_count,
        listen_ip = %config.listen.listen_ip,
        announced_ip = %config.listen.announced_ip,
        rtc_min_port = config.listen.rtc_min_port,
        rtc_max_port = config.listen.rtc_max_port,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    let pool = WorkerPool::initialize(
        config.worker_count,
        &default_media_codecs(),
        &config.listen,
        shutdown_token.child_token(),
    )
    .map_err(|e| {
        error!(error = %e, "Failed to start worker pool");
        e
    })?;
    let pool = Arc::new(pool);
    info!(workers = pool.size(), "Worker pool started");

    let fatal_health = Arc::clone(&health_state);
    let _fault_monitor = pool.spawn_fault_monitor(config.worker_exit_delay, move |fault| {
        fatal_health.set_not_ready();
        error!(error = %fault, "Exiting after media worker death");
        std::process::exit(1);
    })
    .await?;

    let actor_metrics = ActorMetrics::new();

    // Health server: liveness, readiness, pool status and Prometheus /metrics
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state))
        .merge(status_router(Arc::new(StatusState {
            pool: Arc::clone(&pool),
            actor_metrics: Arc::clone(&actor_metrics),
        })))
        .merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(config.health_bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.health_bind_address, "Failed to bind health server");
            e
        })?;
    let signaling_listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind signaling server");
            e
        })?;

    let health_addr = config.health_bind_address;
    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let signaling_state = SignalingState::new(
        Arc::clone(&pool),
        Arc::clone(&actor_metrics),
        shutdown_token.child_token(),
    );
    let signaling_app = signaling_router(signaling_state).layer(TraceLayer::new_for_http());

    let signaling_addr = config.bind_address;
    let signaling_shutdown_token = shutdown_token.child_token();
    let signaling_task = tokio::spawn(async move {
        info!(addr = %signaling_addr, "Signaling server starting");
        let server = axum::serve(signaling_listener, signaling_app).with_graceful_shutdown(
            async move {
                signaling_shutdown_token.cancelled().await;
                info!("Signaling server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Media Server running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();
    shutdown_token.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, signaling_task)
        .await
        .is_err()
    {
        info!(
            active_connections = actor_metrics.connection_count(),
            "Signaling server did not stop within grace period"
        );
    }

    pool.shutdown().await;

    info!("Media Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
