//! Media server error types.
//!
//! Error types map to signaling [`ErrorCode`] values for client responses.
//! Internal details are logged server-side but not exposed to clients.

use common::types::{ConsumerId, ProducerId, TransportId, WorkerId};
use signaling_protocol::{ErrorCode, SignalError};
use thiserror::Error;

/// Media server error type.
///
/// Maps to signaling `ErrorCode` values:
/// - `*NotFound`, `EmptyTargetList`: `not_found`
/// - `Negotiation`: `negotiation_failed`
/// - `InvalidState`: `invalid_state`
/// - `InvalidRequest`: `invalid_request`
/// - `PoolInit`, `WorkerFault`, `Internal`: `internal`
#[derive(Debug, Error)]
pub enum MediaServerError {
    /// The worker pool could not be created. Fatal at startup.
    #[error("Worker pool initialization failed: {0}")]
    PoolInit(String),

    /// A worker reported an unrecoverable fault.
    #[error("Worker {worker_id} fault: {reason}")]
    WorkerFault { worker_id: WorkerId, reason: String },

    /// The connection session no longer exists (torn down or never created).
    #[error("Session not found")]
    SessionNotFound,

    #[error("Transport not found: {0}")]
    TransportNotFound(TransportId),

    #[error("Producer not found: {0}")]
    ProducerNotFound(ProducerId),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(ConsumerId),

    /// `consume` was called without any target participant.
    #[error("Empty target participant list")]
    EmptyTargetList,

    /// DTLS or RTP negotiation failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Operation not allowed in the current transport state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Frame could not be decoded as a request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaServerError {
    /// Returns the signaling `ErrorCode` for this error.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            MediaServerError::SessionNotFound
            | MediaServerError::TransportNotFound(_)
            | MediaServerError::ProducerNotFound(_)
            | MediaServerError::ConsumerNotFound(_)
            | MediaServerError::EmptyTargetList => ErrorCode::NotFound,
            MediaServerError::Negotiation(_) => ErrorCode::NegotiationFailed,
            MediaServerError::InvalidState(_) => ErrorCode::InvalidState,
            MediaServerError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            MediaServerError::PoolInit(_)
            | MediaServerError::WorkerFault { .. }
            | MediaServerError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            MediaServerError::PoolInit(_)
            | MediaServerError::WorkerFault { .. }
            | MediaServerError::Internal(_) => "An internal error occurred".to_string(),
            MediaServerError::SessionNotFound => "Session not found".to_string(),
            MediaServerError::TransportNotFound(_) => "Transport not found".to_string(),
            MediaServerError::ProducerNotFound(_) => "Producer not found".to_string(),
            MediaServerError::ConsumerNotFound(_) => "Consumer not found".to_string(),
            MediaServerError::EmptyTargetList => {
                "At least one participant id is required".to_string()
            }
            MediaServerError::Negotiation(msg)
            | MediaServerError::InvalidState(msg)
            | MediaServerError::InvalidRequest(msg) => msg.clone(),
        }
    }

    /// Convert into the wire error sent to the client.
    #[must_use]
    pub fn to_signal_error(&self) -> SignalError {
        SignalError::new(self.error_code(), self.client_message())
    }
}
