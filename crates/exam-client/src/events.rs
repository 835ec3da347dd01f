//! Backend event connection.
//!
//! A WebSocket to `{events_url}?exam_id=…` carrying `BackendEvent` frames
//! inbound and `BackendCommand` frames outbound. Undecodable frames are
//! logged and skipped.

use crate::errors::ClientError;
use crate::signaling::{connect_websocket, spawn_writer, WsStream};
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use signaling_protocol::codec::{decode_event, encode_command};
use signaling_protocol::{BackendCommand, BackendEvent};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Live connection to the backend event stream.
pub struct EventChannel {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<BackendEvent>,
    closed: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventChannel {
    /// Connect for `exam_id`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connect` if the WebSocket handshake fails.
    #[instrument(skip_all, fields(exam_id = %exam_id))]
    pub async fn connect(
        events_url: &Url,
        exam_id: &str,
        session_id: Option<&str>,
    ) -> Result<Self, ClientError> {
        let mut url = events_url.clone();
        url.query_pairs_mut().append_pair("exam_id", exam_id);

        let stream = connect_websocket(&url, session_id).await?;
        let (sink, stream) = stream.split();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let writer = spawn_writer(sink, outbound_rx, closed.clone());
        let reader = tokio::spawn(read_events(stream, inbound_tx, closed.clone()));

        debug!(target: "client.events", "Backend event connection open");

        Ok(Self {
            outbound,
            inbound,
            closed,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    /// Next backend event; `None` once the connection is closed and drained.
    pub async fn next_event(&mut self) -> Option<BackendEvent> {
        self.inbound.recv().await
    }

    /// Send a command to the backend.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConnectionClosed` if the connection is gone.
    pub fn send(&self, command: &BackendCommand) -> Result<(), ClientError> {
        if self.closed.is_cancelled() {
            return Err(ClientError::ConnectionClosed);
        }
        let text = encode_command(command)?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| ClientError::ConnectionClosed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&self) {
        self.closed.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                debug!(target: "client.events", "Socket task did not stop in time");
            }
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn read_events(
    mut stream: SplitStream<WsStream>,
    inbound: mpsc::UnboundedSender<BackendEvent>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match decode_event(&text) {
                Ok(event) => {
                    if inbound.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(target: "client.events", error = %e, "Undecodable backend event");
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(target: "client.events", error = %e, "Backend event connection error");
                break;
            }
            Some(Ok(_)) => {}
        }
    }

    closed.cancel();
    debug!(target: "client.events", "Backend event connection closed");
}
