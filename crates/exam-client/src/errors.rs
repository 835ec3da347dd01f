//! Exam client error types.
//!
//! `ClientError` is what individual operations return. The orchestrator wraps
//! it in `SessionError` together with the step that failed, so callers can
//! tell an admission rejection from a publish failure.

use signaling_protocol::{CodecError, ErrorCode, SignalError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Admission failed: {0}")]
    Admission(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Device capabilities not loaded")]
    DeviceNotLoaded,

    #[error("No codec in common with the media server")]
    NoCommonCodecs,

    #[error("Media capture failed: {0}")]
    Capture(String),

    #[error("Signaling error ({code}): {message}")]
    Signal { code: ErrorCode, message: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<SignalError> for ClientError {
    fn from(error: SignalError) -> Self {
        ClientError::Signal {
            code: error.code,
            message: error.message,
        }
    }
}

impl ClientError {
    /// Wire error code when the server rejected the request.
    #[must_use]
    pub fn signal_code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Signal { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Orchestrator steps, in the order a session runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    Admission,
    MediaConnect,
    CapabilityLoad,
    Publish,
    Subscribe,
    EventConnect,
    Messaging,
    Resume,
}

impl SessionStep {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionStep::Admission => "admission",
            SessionStep::MediaConnect => "media_connect",
            SessionStep::CapabilityLoad => "capability_load",
            SessionStep::Publish => "publish",
            SessionStep::Subscribe => "subscribe",
            SessionStep::EventConnect => "event_connect",
            SessionStep::Messaging => "messaging",
            SessionStep::Resume => "resume",
        }
    }
}

impl fmt::Display for SessionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed orchestrator step.
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct SessionError {
    pub step: SessionStep,
    #[source]
    pub source: ClientError,
}

impl SessionError {
    #[must_use]
    pub fn new(step: SessionStep, source: ClientError) -> Self {
        Self { step, source }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_signal_error_conversion() {
        let err = ClientError::from(SignalError::new(ErrorCode::NotFound, "Transport not found"));
        assert_eq!(err.signal_code(), Some(ErrorCode::NotFound));
        assert_eq!(
            err.to_string(),
            "Signaling error (not_found): Transport not found"
        );
        assert_eq!(ClientError::ConnectionClosed.signal_code(), None);
    }

    #[test]
    fn test_session_error_display_and_source() {
        let err = SessionError::new(SessionStep::Publish, ClientError::DeviceNotLoaded);
        assert_eq!(err.to_string(), "publish failed: Device capabilities not loaded");
        assert!(err.source().is_some());
    }
}
