//! `ConnectionActor` - per-connection owner of a `ConnectionSession`.
//!
//! Each `ConnectionActor`:
//! - Owns exactly one `ConnectionSession`
//! - Processes signaling requests strictly in arrival order
//! - Tears the session down on close, cancellation or when every handle is dropped
//!
//! Requests still queued when the actor stops are answered with
//! `SessionNotFound` instead of being left hanging.

use crate::errors::MediaServerError;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{ConnectionSession, SessionSnapshot};

use signaling_protocol::{Request, ResponseBody};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 64;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn send(&self, message: ConnectionMessage) -> Result<(), MediaServerError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|_| {
            self.mailbox.record_dropped();
            MediaServerError::SessionNotFound
        })
    }

    /// Run one signaling request against the session.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or `SessionNotFound` when the actor
    /// has stopped.
    pub async fn request(&self, request: Request) -> Result<ResponseBody, MediaServerError> {
        let (tx, rx) = oneshot::channel();
        self.send(ConnectionMessage::Request {
            request,
            respond_to: tx,
        })
        .await?;

        rx.await.map_err(|_| MediaServerError::SessionNotFound)?
    }

    /// Read the session's resource counts.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` when the actor has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, MediaServerError> {
        let (tx, rx) = oneshot::channel();
        self.send(ConnectionMessage::Snapshot { respond_to: tx })
            .await?;
        rx.await.map_err(|_| MediaServerError::SessionNotFound)
    }

    /// Tear down the session and stop the actor.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` when the actor has already stopped.
    pub async fn close(&self, reason: impl Into<String>) -> Result<(), MediaServerError> {
        self.send(ConnectionMessage::Close {
            reason: reason.into(),
        })
        .await
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: String,
    session: ConnectionSession,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActor {
    /// Spawn a new connection actor owning `session`.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        session: ConnectionSession,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let connection_id = session.connection_id().to_string();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, &connection_id));

        metrics.connection_created();

        let actor = Self {
            connection_id: connection_id.clone(),
            session,
            receiver,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "media.actor.connection",
        fields(
            connection_id = %self.connection_id,
            worker_id = %self.session.worker_id()
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "media.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        let reason = loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "media.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break "cancelled".to_string();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if let Some(reason) = exit {
                                break reason;
                            }
                        }
                        None => {
                            debug!(
                                target: "media.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break "handles dropped".to_string();
                        }
                    }
                }
            }
        };

        self.session.teardown().await;
        self.drain_mailbox();
        self.metrics.connection_closed();

        info!(
            target: "media.actor.connection",
            connection_id = %self.connection_id,
            reason = %reason,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns a close reason if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> Option<String> {
        match message {
            ConnectionMessage::Request {
                request,
                respond_to,
            } => {
                let result = self.session.handle(request).await;
                let _ = respond_to.send(result);
                None
            }

            ConnectionMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.session.snapshot());
                None
            }

            ConnectionMessage::Close { reason } => Some(reason),
        }
    }

    /// Fail everything still queued once the session is gone.
    fn drain_mailbox(&mut self) {
        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            self.mailbox.record_dropped();
            match message {
                ConnectionMessage::Request { respond_to, .. } => {
                    let _ = respond_to.send(Err(MediaServerError::SessionNotFound));
                }
                ConnectionMessage::Snapshot { respond_to } => {
                    let _ = respond_to.send(self.session.snapshot());
                }
                ConnectionMessage::Close { .. } => {}
            }
        }
    }
}
