//! JSON text-frame codec for the signaling and event connections.

use crate::events::{BackendCommand, BackendEvent};
use crate::message::{RequestEnvelope, ResponseEnvelope};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Largest frame either side accepts (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is not valid JSON for the expected message
    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame exceeds [`MAX_FRAME_SIZE`]
    #[error("Frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge { size: usize },
}

fn encode<T: Serialize>(message: &T) -> Result<String, CodecError> {
    let text = serde_json::to_string(message)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge { size: text.len() });
    }
    Ok(text)
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge { size: text.len() });
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a signaling request
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large
pub fn encode_request(request: &RequestEnvelope) -> Result<String, CodecError> {
    encode(request)
}

/// Decode a signaling request
///
/// # Errors
///
/// Returns an error if the frame is malformed or too large
pub fn decode_request(text: &str) -> Result<RequestEnvelope, CodecError> {
    decode(text)
}

/// Encode a signaling response
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large
pub fn encode_response(response: &ResponseEnvelope) -> Result<String, CodecError> {
    encode(response)
}

/// Decode a signaling response
///
/// # Errors
///
/// Returns an error if the frame is malformed or too large
pub fn decode_response(text: &str) -> Result<ResponseEnvelope, CodecError> {
    decode(text)
}

/// Encode a backend event
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large
pub fn encode_event(event: &BackendEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decode a backend event
///
/// # Errors
///
/// Returns an error if the frame is malformed or too large
pub fn decode_event(text: &str) -> Result<BackendEvent, CodecError> {
    decode(text)
}

/// Encode a client command for the backend
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large
pub fn encode_command(command: &BackendCommand) -> Result<String, CodecError> {
    encode(command)
}

/// Decode a client command
///
/// # Errors
///
/// Returns an error if the frame is malformed or too large
pub fn decode_command(text: &str) -> Result<BackendCommand, CodecError> {
    decode(text)
}

/// Best-effort extraction of the request id from a frame that failed to decode.
///
/// Returns 0 when the id itself cannot be read.
#[must_use]
pub fn peek_request_id(text: &str) -> u64 {
    if text.len() > MAX_FRAME_SIZE {
        return 0;
    }
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("id").and_then(serde_json::Value::as_u64))
        .unwrap_or(0)
}
