//! Signaling protocol handler - WebSocket endpoint at `GET /signal`.
//!
//! Each accepted WebSocket gets a fresh `ConnectionSession` (on the next
//! worker of the pool) wrapped in a `ConnectionActor`. Text frames carry
//! JSON request envelopes; each is answered with a response envelope
//! carrying the same id. Frames on one connection are processed strictly in
//! order. A malformed frame is answered with `invalid_request` and does not
//! end the session; closing the socket tears the session down.

use crate::actors::{
    ActorMetrics, ActorType, ConnectionActor, ConnectionActorHandle, ConnectionSession,
};
use crate::engine::ProducerDirectory;
use crate::errors::MediaServerError;
use crate::observability::metrics;
use crate::pool::WorkerPool;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use signaling_protocol::codec::{self, peek_request_id};
use signaling_protocol::{ResponseEnvelope, SignalError, MAX_FRAME_SIZE};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared state of the signaling endpoint.
pub struct SignalingState {
    pub pool: Arc<WorkerPool>,
    pub directory: Arc<ProducerDirectory>,
    pub actor_metrics: Arc<ActorMetrics>,
    pub cancel_token: CancellationToken,
}

impl SignalingState {
    #[must_use]
    pub fn new(
        pool: Arc<WorkerPool>,
        actor_metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            directory: Arc::new(ProducerDirectory::new()),
            actor_metrics,
            cancel_token,
        })
    }

    /// Create a session and spawn its actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot assign a worker.
    pub async fn open_connection(&self) -> Result<ConnectionActorHandle, MediaServerError> {
        let connection_id = Uuid::new_v4().to_string();
        let session =
            ConnectionSession::create(connection_id, &self.pool, Arc::clone(&self.directory))
                .await?;

        let (handle, task) = ConnectionActor::spawn(
            session,
            self.cancel_token.child_token(),
            Arc::clone(&self.actor_metrics),
        );

        let actor_metrics = Arc::clone(&self.actor_metrics);
        tokio::spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    actor_metrics.record_panic(ActorType::Connection);
                }
            }
        });

        Ok(handle)
    }
}

/// Router serving the signaling WebSocket.
pub fn signaling_router(state: Arc<SignalingState>) -> Router {
    Router::new()
        .route("/signal", get(signal_handler))
        .with_state(state)
}

async fn signal_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SignalingState>>,
) -> Response {
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<SignalingState>) {
    let actor = match state.open_connection().await {
        Ok(actor) => actor,
        Err(e) => {
            error!(target: "media.signaling", error = %e, "Failed to create session");
            return;
        }
    };
    let connection_id = actor.connection_id().to_string();
    info!(target: "media.signaling", connection_id = %connection_id, "Client connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        let frame = tokio::select! {
            () = state.cancel_token.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            frame = receiver.next() => frame,
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(
                    target: "media.signaling",
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
            None => break,
        };

        let response = match message {
            Message::Text(text) => handle_frame(&actor, &text).await,
            Message::Binary(_) => invalid_request(0, "binary frames are not supported"),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        if sender.send(Message::Text(encode(&response))).await.is_err() {
            debug!(
                target: "media.signaling",
                connection_id = %connection_id,
                "Client went away while sending response"
            );
            break;
        }
    }

    // The actor may already be gone after server cancellation
    let _ = actor.close("connection closed").await;
    info!(target: "media.signaling", connection_id = %connection_id, "Client disconnected");
}

/// Decode one text frame, run it against the session and build the reply.
pub async fn handle_frame(actor: &ConnectionActorHandle, text: &str) -> ResponseEnvelope {
    let started = Instant::now();

    let envelope = match codec::decode_request(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            let id = peek_request_id(text);
            debug!(
                target: "media.signaling",
                connection_id = %actor.connection_id(),
                request_id = id,
                error = %e,
                "Malformed signaling frame"
            );
            metrics::record_signaling_request("invalid", "invalid_request", started.elapsed());
            return invalid_request(id, &e.to_string());
        }
    };

    let method = envelope.request.method();
    let result = actor.request(envelope.request).await;

    let status = match &result {
        Ok(_) => "ok",
        Err(e) => {
            match e {
                MediaServerError::Internal(_) | MediaServerError::WorkerFault { .. } => {
                    error!(
                        target: "media.signaling",
                        connection_id = %actor.connection_id(),
                        method,
                        error = %e,
                        "Signaling request failed"
                    );
                }
                _ => {
                    debug!(
                        target: "media.signaling",
                        connection_id = %actor.connection_id(),
                        method,
                        error = %e,
                        "Signaling request rejected"
                    );
                }
            }
            e.error_code().as_str()
        }
    };
    metrics::record_signaling_request(method, status, started.elapsed());

    ResponseEnvelope::from_result(envelope.id, result.map_err(|e| e.to_signal_error()))
}

fn invalid_request(id: u64, reason: &str) -> ResponseEnvelope {
    ResponseEnvelope::error(
        id,
        MediaServerError::InvalidRequest(reason.to_string()).to_signal_error(),
    )
}

fn encode(response: &ResponseEnvelope) -> String {
    codec::encode_response(response).unwrap_or_else(|e| {
        warn!(target: "media.signaling", error = %e, "Failed to encode response");
        let fallback = ResponseEnvelope::error(
            response.id,
            SignalError::new(
                signaling_protocol::ErrorCode::Internal,
                "An internal error occurred",
            ),
        );
        serde_json::to_string(&fallback).unwrap_or_default()
    })
}
