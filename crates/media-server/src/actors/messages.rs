//! Message types for actor communication.
//!
//! Request-reply uses `tokio::sync::oneshot`; `Close` carries no reply
//! channel.

use super::session::SessionSnapshot;
use crate::errors::MediaServerError;
use signaling_protocol::{Request, ResponseBody};
use tokio::sync::oneshot;

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// A decoded signaling request from the client.
    Request {
        request: Request,
        respond_to: oneshot::Sender<Result<ResponseBody, MediaServerError>>,
    },

    /// Read the session's resource counts.
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    /// Tear the session down and stop the actor.
    Close { reason: String },
}
