//! Frames as they appear on the wire, decoded through the public codec.

use signaling_protocol::codec::{decode_event, decode_request, decode_response, encode_command};
use signaling_protocol::rtp::{DtlsRole, MediaKind};
use signaling_protocol::{BackendCommand, BackendEvent, Request, ResponseBody};

#[test]
fn test_produce_frame_from_client() {
    let frame = r#"{
        "id": 12,
        "method": "produce",
        "transport_id": "6f1c1c0e-0d8b-4a53-9a43-3d0f3f5b7c11",
        "kind": "video",
        "participant_id": "examinee-17",
        "rtp_parameters": {
            "mid": "1",
            "codecs": [{
                "mime_type": "video/VP8",
                "payload_type": 96,
                "clock_rate": 90000,
                "parameters": {"x-google-start-bitrate": 1000},
                "rtcp_feedback": [{"type": "nack"}, {"type": "nack", "parameter": "pli"}]
            }],
            "encodings": [{"ssrc": 22223333}]
        }
    }"#;

    let envelope = decode_request(frame).unwrap();
    assert_eq!(envelope.id, 12);
    let Request::Produce {
        kind,
        participant_id,
        rtp_parameters,
        ..
    } = envelope.request
    else {
        panic!("expected produce, got {:?}", envelope.request);
    };

    assert_eq!(kind, MediaKind::Video);
    assert_eq!(participant_id.as_str(), "examinee-17");
    let codec = rtp_parameters.media_codec().unwrap();
    assert_eq!(codec.kind(), Some(MediaKind::Video));
    assert_eq!(codec.rtcp_feedback.len(), 2);
    assert_eq!(rtp_parameters.encodings[0].ssrc, Some(22_223_333));
}

#[test]
fn test_connect_transport_frame_from_client() {
    let frame = r#"{
        "id": 3,
        "method": "connect_transport",
        "transport_id": "6f1c1c0e-0d8b-4a53-9a43-3d0f3f5b7c11",
        "dtls_parameters": {
            "role": "client",
            "fingerprints": [{
                "algorithm": "sha-256",
                "value": "AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB:AB"
            }]
        }
    }"#;

    let Request::ConnectTransport {
        dtls_parameters, ..
    } = decode_request(frame).unwrap().request
    else {
        panic!("expected connect_transport");
    };
    assert_eq!(dtls_parameters.role, DtlsRole::Client);
    dtls_parameters.validate().unwrap();
}

#[test]
fn test_consumed_frame_from_server() {
    let frame = r#"{
        "id": 5,
        "result": {
            "type": "consumed",
            "consumers": [{
                "consumer_id": "0b6d4a47-5d0e-4d57-8f8e-5d2b1c6f0a01",
                "producer_id": "1c7e5b58-6e1f-4e68-9f9f-6e3c2d7f1b02",
                "participant_id": "examinee-3",
                "kind": "audio",
                "rtp_parameters": {
                    "codecs": [{"mime_type": "audio/opus", "payload_type": 111, "clock_rate": 48000, "channels": 2}],
                    "encodings": [{"ssrc": 4242}]
                },
                "paused": true
            }]
        }
    }"#;

    let response = decode_response(frame).unwrap();
    assert_eq!(response.id, 5);
    let ResponseBody::Consumed { consumers } = response.into_result().unwrap() else {
        panic!("expected consumed");
    };
    assert_eq!(consumers.len(), 1);
    assert_eq!(consumers[0].participant_id.as_str(), "examinee-3");
    assert_eq!(consumers[0].kind, MediaKind::Audio);
    assert!(consumers[0].paused);
}

#[test]
fn test_error_frame_from_server() {
    let frame = r#"{"id": 8, "error": {"code": "invalid_state", "message": "transport not connected"}}"#;

    let error = decode_response(frame).unwrap().into_result().unwrap_err();
    assert_eq!(error.code.to_string(), "invalid_state");
    assert_eq!(error.message, "transport not connected");
}

#[test]
fn test_backend_event_frames() {
    let event = decode_event(
        r#"{"type": "cheating_detected", "participant_id": "examinee-9", "reason": "phone detected", "confidence": 0.81}"#,
    )
    .unwrap();
    assert!(matches!(
        event,
        BackendEvent::CheatingDetected { confidence: Some(c), .. } if (c - 0.81).abs() < f64::EPSILON
    ));

    let event = decode_event(r#"{"type": "message", "text": "Pens down"}"#).unwrap();
    assert_eq!(
        event,
        BackendEvent::Message {
            text: "Pens down".to_string(),
            sender_id: None,
        }
    );

    assert!(decode_event(r#"{"type": "participant_teleported"}"#).is_err());
}

#[test]
fn test_send_message_frame_to_backend() {
    let text = encode_command(&BackendCommand::SendMessage {
        text: "Eyes on your own screen".to_string(),
        recipients: vec!["examinee-2".into()],
    })
    .unwrap();

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "type": "send_message",
            "text": "Eyes on your own screen",
            "recipients": ["examinee-2"]
        })
    );
}
