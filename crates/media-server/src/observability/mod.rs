//! Observability: health probes, pool status and Prometheus metrics.

pub mod health;
pub mod metrics;

pub use health::{health_router, status_router, HealthState, StatusState};
