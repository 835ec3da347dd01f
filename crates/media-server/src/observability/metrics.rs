//! Metrics definitions for the media server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `media_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: 6 signaling operations plus `invalid`
//! - `status`: `ok` or one of 5 error codes
//! - `worker`: bounded by the worker count

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signaling request latency - in-process work, sub-millisecond expected
        .set_buckets_for_metric(
            Matcher::Prefix("media_signaling_request".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set signaling latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Resource Gauges
// ============================================================================

/// Metric: `media_sessions_active`
pub fn session_opened() {
    gauge!("media_sessions_active").increment(1.0);
}

pub fn session_closed() {
    gauge!("media_sessions_active").decrement(1.0);
}

/// Metric: `media_transports_active`
pub fn transport_opened() {
    gauge!("media_transports_active").increment(1.0);
}

pub fn transport_closed() {
    gauge!("media_transports_active").decrement(1.0);
}

/// Metric: `media_producers_active`
pub fn producer_opened() {
    gauge!("media_producers_active").increment(1.0);
}

pub fn producer_closed() {
    gauge!("media_producers_active").decrement(1.0);
}

// ============================================================================
// Counters
// ============================================================================

/// Record consumers created by one `consume` call.
///
/// Metric: `media_consumers_created_total`
pub fn record_consumers_created(count: usize) {
    counter!("media_consumers_created_total").increment(count as u64);
}

/// Record a handled signaling request.
///
/// Metric: `media_signaling_requests_total`, `media_signaling_request_duration_seconds`
/// Labels: `method`, `status`
pub fn record_signaling_request(method: &'static str, status: &'static str, duration: Duration) {
    counter!(
        "media_signaling_requests_total",
        "method" => method,
        "status" => status
    )
    .increment(1);

    histogram!("media_signaling_request_duration_seconds", "method" => method)
        .record(duration.as_secs_f64());
}

/// Record a session assigned to a worker.
///
/// Metric: `media_worker_assignments_total`
/// Labels: `worker`
pub fn record_worker_assignment(worker: &str) {
    counter!("media_worker_assignments_total", "worker" => worker.to_string()).increment(1);
}

/// Record a worker death.
///
/// Metric: `media_worker_deaths_total`
pub fn record_worker_death(worker: &str) {
    counter!("media_worker_deaths_total", "worker" => worker.to_string()).increment(1);
}
