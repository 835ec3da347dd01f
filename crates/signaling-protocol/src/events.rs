//! Messages on the backend event connection.
//!
//! The exam backend pushes participant lifecycle and proctoring events to
//! every connected client; clients push chat messages back.

use common::types::ParticipantId;
use serde::{Deserialize, Serialize};

/// Event pushed by the exam backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    /// A participant joined and is (about to be) publishing.
    ParticipantConnected { participant_id: ParticipantId },

    /// A participant left the exam.
    ParticipantDisconnected { participant_id: ParticipantId },

    /// The backend flagged suspicious behaviour.
    CheatingDetected {
        participant_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },

    /// Chat or instruction text.
    Message {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<ParticipantId>,
    },

    /// Backend-side error report.
    Error { message: String },
}

/// Command sent by a client to the exam backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendCommand {
    /// Deliver `text` to `recipients`; an empty list broadcasts.
    SendMessage {
        text: String,
        #[serde(default)]
        recipients: Vec<ParticipantId>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cheating_event_optional_fields() {
        let event: BackendEvent = serde_json::from_value(json!({
            "type": "cheating_detected",
            "participant_id": "examinee-4"
        }))
        .unwrap();

        assert_eq!(
            event,
            BackendEvent::CheatingDetected {
                participant_id: ParticipantId::from("examinee-4"),
                reason: None,
                confidence: None,
            }
        );
    }

    #[test]
    fn test_participant_connected_parses() {
        let event: BackendEvent = serde_json::from_value(json!({
            "type": "participant_connected",
            "participant_id": "examinee-1"
        }))
        .unwrap();
        assert!(matches!(
            event,
            BackendEvent::ParticipantConnected { participant_id } if participant_id.as_str() == "examinee-1"
        ));
    }

    #[test]
    fn test_broadcast_message_has_empty_recipients() {
        let command: BackendCommand = serde_json::from_value(json!({
            "type": "send_message",
            "text": "five minutes left"
        }))
        .unwrap();

        let BackendCommand::SendMessage { text, recipients } = command;
        assert_eq!(text, "five minutes left");
        assert!(recipients.is_empty());
    }
}
