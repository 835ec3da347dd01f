//! Exam client configuration.
//!
//! Loaded from environment variables; `EXAM_ID`, `EXAM_PARTICIPANT_ID` and
//! `EXAM_CREDENTIAL` are required, everything else has a local-development
//! default.

use common::config::ObservabilityConfig;
use common::secret::SecretString;
use common::types::ParticipantId;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default exam backend HTTP base URL.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Default media server signaling URL.
pub const DEFAULT_MEDIA_URL: &str = "ws://localhost:9099/signal";

/// Default backend event WebSocket URL.
pub const DEFAULT_EVENTS_URL: &str = "ws://localhost:8000/ws/events";

/// Default signaling request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Which side of the exam this client is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Publishes its camera and microphone.
    Examinee,
    /// Subscribes to examinees' streams.
    Proctor,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Examinee => "examinee",
            Role::Proctor => "proctor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "examinee" => Ok(Role::Examinee),
            "proctor" | "supervisor" => Ok(Role::Proctor),
            other => Err(ConfigError::InvalidValue(format!(
                "EXAM_ROLE must be examinee or proctor, got {other}"
            ))),
        }
    }
}

/// Exam client configuration.
///
/// The credential is a `SecretString`, so `Debug` output redacts it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: Url,
    pub media_url: Url,
    pub events_url: Url,
    pub exam_id: String,
    /// Identity tagged onto published tracks.
    pub participant_id: ParticipantId,
    pub credential: SecretString,
    pub role: Role,
    pub request_timeout: Duration,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_url(vars: &HashMap<String, String>, name: &str, default: &str) -> Result<Url, ConfigError> {
    let raw = vars.get(name).map_or(default, String::as_str);
    Url::parse(raw).map_err(|e| ConfigError::InvalidValue(format!("{name}={raw}: {e}")))
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from a variable map.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let backend_url = parse_url(vars, "EXAM_BACKEND_URL", DEFAULT_BACKEND_URL)?;
        let media_url = parse_url(vars, "EXAM_MEDIA_URL", DEFAULT_MEDIA_URL)?;
        let events_url = parse_url(vars, "EXAM_EVENTS_URL", DEFAULT_EVENTS_URL)?;

        for (name, url) in [("EXAM_MEDIA_URL", &media_url), ("EXAM_EVENTS_URL", &events_url)] {
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must use ws or wss, got {}",
                    url.scheme()
                )));
            }
        }

        let exam_id = required(vars, "EXAM_ID")?;
        let participant_id = ParticipantId::from(required(vars, "EXAM_PARTICIPANT_ID")?);
        let credential = SecretString::from(required(vars, "EXAM_CREDENTIAL")?);

        let role = match vars.get("EXAM_ROLE") {
            Some(raw) => raw.parse()?,
            None => Role::Examinee,
        };

        let timeout_secs = match vars.get("EXAM_REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue(format!("EXAM_REQUEST_TIMEOUT_SECS={raw}: {e}"))
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "EXAM_REQUEST_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            backend_url,
            media_url,
            events_url,
            exam_id,
            participant_id,
            credential,
            role,
            request_timeout: Duration::from_secs(timeout_secs),
            observability: ObservabilityConfig::from_vars(vars),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("EXAM_ID".to_string(), "exam-42".to_string()),
            ("EXAM_PARTICIPANT_ID".to_string(), "examinee-7".to_string()),
            ("EXAM_CREDENTIAL".to_string(), "token-abc".to_string()),
        ])
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_vars(&base_vars()).unwrap();

        assert_eq!(config.backend_url.as_str(), "http://localhost:8000/");
        assert_eq!(config.media_url.as_str(), "ws://localhost:9099/signal");
        assert_eq!(config.events_url.as_str(), "ws://localhost:8000/ws/events");
        assert_eq!(config.exam_id, "exam-42");
        assert_eq!(config.participant_id.as_str(), "examinee-7");
        assert_eq!(config.credential.expose_secret(), "token-abc");
        assert_eq!(config.role, Role::Examinee);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_missing_required() {
        let mut vars = base_vars();
        vars.remove("EXAM_CREDENTIAL");
        let err = ClientConfig::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "EXAM_CREDENTIAL"));

        let mut vars = base_vars();
        vars.remove("EXAM_PARTICIPANT_ID");
        assert!(matches!(
            ClientConfig::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(name)) if name == "EXAM_PARTICIPANT_ID"
        ));

        let mut vars = base_vars();
        vars.insert("EXAM_ID".to_string(), String::new());
        assert!(matches!(
            ClientConfig::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_role_parsing() {
        let mut vars = base_vars();
        vars.insert("EXAM_ROLE".to_string(), "Proctor".to_string());
        assert_eq!(ClientConfig::from_vars(&vars).unwrap().role, Role::Proctor);

        vars.insert("EXAM_ROLE".to_string(), "admin".to_string());
        assert!(matches!(
            ClientConfig::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_rejects_http_media_url() {
        let mut vars = base_vars();
        vars.insert(
            "EXAM_MEDIA_URL".to_string(),
            "http://localhost:9099/signal".to_string(),
        );
        assert!(matches!(
            ClientConfig::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut vars = base_vars();
        vars.insert("EXAM_REQUEST_TIMEOUT_SECS".to_string(), "0".to_string());
        assert!(ClientConfig::from_vars(&vars).is_err());
    }

    #[test]
    fn test_debug_redacts_credential() {
        let config = ClientConfig::from_vars(&base_vars()).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("token-abc"));
    }
}
