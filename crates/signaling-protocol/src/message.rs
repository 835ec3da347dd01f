//! Request/response envelopes for the media control connection.
//!
//! Every request carries a client-chosen `id`; the server answers with a
//! response carrying the same `id` and either a `result` or an `error`.
//!
//! ```json
//! {"id": 7, "method": "consume", "transport_id": "…", "participant_ids": ["examinee-1"], "rtp_capabilities": {…}}
//! {"id": 7, "result": {"type": "consumed", "consumers": […]}}
//! {"id": 8, "error": {"code": "not_found", "message": "Transport not found"}}
//! ```

use crate::rtp::{
    DtlsParameters, IceCandidate, IceParameters, MediaKind, RtpCapabilities, RtpParameters,
};
use common::types::{ConsumerId, ParticipantId, ProducerId, TransportId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request sent by a client over the media control connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// Signaling operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    GetRouterCapabilities,
    CreateTransport,
    ConnectTransport {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        participant_id: ParticipantId,
    },
    Consume {
        transport_id: TransportId,
        participant_ids: Vec<ParticipantId>,
        rtp_capabilities: RtpCapabilities,
    },
    ResumeConsumer {
        consumer_id: ConsumerId,
    },
}

impl Request {
    /// Wire name of the operation, used as a metrics label.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Request::GetRouterCapabilities => "get_router_capabilities",
            Request::CreateTransport => "create_transport",
            Request::ConnectTransport { .. } => "connect_transport",
            Request::Produce { .. } => "produce",
            Request::Consume { .. } => "consume",
            Request::ResumeConsumer { .. } => "resume_consumer",
        }
    }
}

/// Descriptor of a newly created transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportInfo {
    pub transport_id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Descriptor of a consumer created by `consume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub participant_id: ParticipantId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
}

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    RouterCapabilities { rtp_capabilities: RtpCapabilities },
    TransportCreated(TransportInfo),
    Ack,
    Produced { producer_id: ProducerId },
    Consumed { consumers: Vec<ConsumerInfo> },
}

/// Error categories reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    NegotiationFailed,
    InvalidState,
    InvalidRequest,
    Internal,
}

impl ErrorCode {
    /// Wire name of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::NegotiationFailed => "negotiation_failed",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failed result of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalError {
    pub code: ErrorCode,
    pub message: String,
}

impl SignalError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Outcome carried by a response, serialized as either `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Result(ResponseBody),
    Error(SignalError),
}

/// Response sent by the server, correlated to a request by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(id: u64, body: ResponseBody) -> Self {
        Self {
            id,
            outcome: Outcome::Result(body),
        }
    }

    #[must_use]
    pub fn error(id: u64, error: SignalError) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    #[must_use]
    pub fn from_result(id: u64, result: Result<ResponseBody, SignalError>) -> Self {
        match result {
            Ok(body) => Self::ok(id, body),
            Err(error) => Self::error(id, error),
        }
    }

    /// Convert into a plain `Result`.
    ///
    /// # Errors
    ///
    /// Returns the carried [`SignalError`] when the request failed.
    pub fn into_result(self) -> Result<ResponseBody, SignalError> {
        match self.outcome {
            Outcome::Result(body) => Ok(body),
            Outcome::Error(error) => Err(error),
        }
    }

    /// Whether the response carries a result.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Result(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let envelope = RequestEnvelope {
            id: 3,
            request: Request::Consume {
                transport_id: TransportId::new(),
                participant_ids: vec![ParticipantId::from("examinee-1")],
                rtp_capabilities: RtpCapabilities::default(),
            },
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["method"], "consume");
        assert_eq!(value["participant_ids"], json!(["examinee-1"]));
    }

    #[test]
    fn test_unit_request_parses_without_fields() {
        let envelope: RequestEnvelope =
            serde_json::from_value(json!({"id": 1, "method": "create_transport"})).unwrap();
        assert_eq!(envelope.id, 1);
        assert_eq!(envelope.request, Request::CreateTransport);
        assert_eq!(envelope.request.method(), "create_transport");
    }

    #[test]
    fn test_unknown_method_rejected() {
        let result: Result<RequestEnvelope, _> =
            serde_json::from_value(json!({"id": 1, "method": "restart_ice"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_error_response_wire_shape() {
        let response = ResponseEnvelope::error(
            9,
            SignalError::new(ErrorCode::NotFound, "Transport not found"),
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["error"]["code"], "not_found");
        assert!(value.get("result").is_none());
        assert!(!response.is_ok());
    }

    #[test]
    fn test_result_response_wire_shape() {
        let producer_id = ProducerId::new();
        let response = ResponseEnvelope::ok(4, ResponseBody::Produced { producer_id });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["result"]["type"], "produced");
        assert_eq!(value["result"]["producer_id"], producer_id.to_string());

        let parsed: ResponseEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(
            parsed.into_result().unwrap(),
            ResponseBody::Produced { producer_id }
        );
    }

    #[test]
    fn test_ack_has_only_type() {
        let response = ResponseEnvelope::ok(2, ResponseBody::Ack);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["result"], json!({"type": "ack"}));
    }
}
