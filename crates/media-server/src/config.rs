//! Media server configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use common::config::ObservabilityConfig;
use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Default signaling (WebSocket) bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:9099";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default IP the media transports listen on.
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";

/// Default IP announced to clients in ICE candidates.
pub const DEFAULT_ANNOUNCED_IP: &str = "127.0.0.1";

/// Default RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 40000;
pub const DEFAULT_RTC_MAX_PORT: u16 = 49999;

/// Default delay between a worker fault and process exit, in milliseconds.
pub const DEFAULT_WORKER_EXIT_DELAY_MS: u64 = 2000;

/// Media server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signaling server bind address (default: "0.0.0.0:9099").
    pub bind_address: SocketAddr,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: SocketAddr,

    /// Number of media workers (default: available parallelism).
    pub worker_count: usize,

    /// Transport listen/announce addresses and port range.
    pub listen: ListenConfig,

    /// Grace period between a worker fault and process exit.
    pub worker_exit_delay: Duration,

    /// Logging options.
    pub observability: ObservabilityConfig,
}

/// Where media transports listen and what they announce to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    pub listen_ip: IpAddr,
    pub announced_ip: IpAddr,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            announced_ip: IpAddr::from([127, 0, 0, 1]),
            rtc_min_port: DEFAULT_RTC_MIN_PORT,
            rtc_max_port: DEFAULT_RTC_MAX_PORT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_var<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = vars.get(name).map_or(default, String::as_str);
    raw.parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{name}={raw}: {e}")))
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or the values
    /// are inconsistent.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = parse_var(vars, "MEDIA_BIND_ADDRESS", DEFAULT_BIND_ADDRESS)?;
        let health_bind_address =
            parse_var(vars, "MEDIA_HEALTH_BIND_ADDRESS", DEFAULT_HEALTH_BIND_ADDRESS)?;

        let worker_count = match vars.get("MEDIA_WORKER_COUNT") {
            Some(raw) => raw.parse::<usize>().map_err(|e| {
                ConfigError::InvalidValue(format!("MEDIA_WORKER_COUNT={raw}: {e}"))
            })?,
            None => std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        };
        if worker_count == 0 {
            return Err(ConfigError::InvalidValue(
                "MEDIA_WORKER_COUNT must be at least 1".to_string(),
            ));
        }

        let listen = ListenConfig {
            listen_ip: parse_var(vars, "MEDIA_LISTEN_IP", DEFAULT_LISTEN_IP)?,
            announced_ip: parse_var(vars, "MEDIA_ANNOUNCED_IP", DEFAULT_ANNOUNCED_IP)?,
            rtc_min_port: parse_var(
                vars,
                "MEDIA_RTC_MIN_PORT",
                &DEFAULT_RTC_MIN_PORT.to_string(),
            )?,
            rtc_max_port: parse_var(
                vars,
                "MEDIA_RTC_MAX_PORT",
                &DEFAULT_RTC_MAX_PORT.to_string(),
            )?,
        };
        if listen.rtc_min_port > listen.rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "MEDIA_RTC_MIN_PORT ({}) exceeds MEDIA_RTC_MAX_PORT ({})",
                listen.rtc_min_port, listen.rtc_max_port
            )));
        }

        let worker_exit_delay_ms: u64 = parse_var(
            vars,
            "MEDIA_WORKER_EXIT_DELAY_MS",
            &DEFAULT_WORKER_EXIT_DELAY_MS.to_string(),
        )?;

        Ok(Config {
            bind_address,
            health_bind_address,
            worker_count,
            listen,
            worker_exit_delay: Duration::from_millis(worker_exit_delay_ms),
            observability: ObservabilityConfig::from_vars(vars),
        })
    }
}
