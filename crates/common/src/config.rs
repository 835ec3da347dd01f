//! Logging configuration shared by every binary in the workspace.
//!
//! `RUST_LOG` always wins when present. Otherwise `LOG_LEVEL` supplies the
//! filter directives and `LOG_FORMAT=json` switches to structured JSON output.

use std::collections::HashMap;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Filter directives (e.g. `media_server=debug,tower_http=info`)
    pub log_level: Option<String>,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

/// Errors raised while installing the global subscriber
#[derive(Debug, Error)]
pub enum TracingInitError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

impl ObservabilityConfig {
    /// Load from a variable map (`LOG_LEVEL`, `LOG_FORMAT`).
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_level = vars.get("LOG_LEVEL").filter(|s| !s.is_empty()).cloned();
        let json_logs = vars
            .get("LOG_FORMAT")
            .is_some_and(|format| format.eq_ignore_ascii_case("json"));

        Self {
            log_level,
            json_logs,
        }
    }
}

/// Install the global tracing subscriber.
///
/// `default_directives` is used when neither `RUST_LOG` nor `LOG_LEVEL` is set.
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed or a subscriber is already
/// installed.
pub fn init_tracing(
    config: &ObservabilityConfig,
    default_directives: &str,
) -> Result<(), TracingInitError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directives = config.log_level.as_deref().unwrap_or(default_directives);
            EnvFilter::try_new(directives)
                .map_err(|e| TracingInitError::InvalidFilter(e.to_string()))?
        }
    };

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    result.map_err(|e| TracingInitError::AlreadyInstalled(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = ObservabilityConfig::from_vars(&HashMap::new());
        assert_eq!(config.log_level, None);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_json_format_is_case_insensitive() {
        let vars = HashMap::from([
            ("LOG_FORMAT".to_string(), "JSON".to_string()),
            ("LOG_LEVEL".to_string(), "media_server=trace".to_string()),
        ]);
        let config = ObservabilityConfig::from_vars(&vars);
        assert!(config.json_logs);
        assert_eq!(config.log_level.as_deref(), Some("media_server=trace"));
    }

    #[test]
    fn test_empty_log_level_is_ignored() {
        let vars = HashMap::from([("LOG_LEVEL".to_string(), String::new())]);
        let config = ObservabilityConfig::from_vars(&vars);
        assert_eq!(config.log_level, None);
    }
}
