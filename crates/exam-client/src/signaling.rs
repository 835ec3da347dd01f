//! Media control connection.
//!
//! One WebSocket to the media server with a reader and a writer task.
//! Requests get increasing ids starting at 1 and wait on a oneshot stored in
//! the pending map; the reader completes them by response id. When the
//! connection drops every pending request fails with `ConnectionClosed`.

use crate::admission::SESSION_ID_HEADER;
use crate::errors::ClientError;
use common::types::{ConsumerId, ParticipantId, ProducerId, TransportId};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use signaling_protocol::codec::{decode_response, encode_request};
use signaling_protocol::rtp::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters};
use signaling_protocol::{ConsumerInfo, Request, RequestEnvelope, ResponseBody, ResponseEnvelope, TransportInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponseEnvelope>>>>;

/// How long `close` waits for the socket tasks.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Open a WebSocket, attaching the admitted session id when present.
pub(crate) async fn connect_websocket(
    url: &Url,
    session_id: Option<&str>,
) -> Result<WsStream, ClientError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::InvalidConfig(format!("Invalid WebSocket URL {url}: {e}")))?;

    if let Some(session_id) = session_id {
        let value = HeaderValue::from_str(session_id)
            .map_err(|e| ClientError::InvalidConfig(format!("Invalid session id: {e}")))?;
        request.headers_mut().insert(SESSION_ID_HEADER, value);
    }

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| ClientError::Connect(format!("{url}: {e}")))?;
    Ok(stream)
}

/// Writer side shared by both WebSocket clients: forwards queued frames and
/// sends a close frame once `closed` fires.
pub(crate) fn spawn_writer(
    mut sink: futures_util::stream::SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    closed: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = closed.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                message = outbound.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    if sink.send(message).await.is_err() {
                        closed.cancel();
                        break;
                    }
                }
            }
        }
    })
}

fn lock_pending(
    pending: &PendingMap,
) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<ResponseEnvelope>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client for the media server's signaling protocol.
pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    closed: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingClient {
    /// Connect to the media server.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connect` if the WebSocket handshake fails.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn connect(
        url: &Url,
        session_id: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = connect_websocket(url, session_id).await?;
        let (sink, stream) = stream.split();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pending = PendingMap::default();
        let closed = CancellationToken::new();

        let writer = spawn_writer(sink, outbound_rx, closed.clone());
        let reader = tokio::spawn(read_responses(
            stream,
            Arc::clone(&pending),
            closed.clone(),
        ));

        debug!(target: "client.signaling", "Media control connection open");

        Ok(Self {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            closed,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Send one request and wait for its response.
    ///
    /// # Errors
    ///
    /// - `ClientError::Signal` when the server answers with an error
    /// - `ClientError::Timeout` when no response arrives in time
    /// - `ClientError::ConnectionClosed` when the connection is gone
    pub async fn request(&self, request: Request) -> Result<ResponseBody, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = request.method();
        let text = encode_request(&RequestEnvelope { id, request })?;

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);

        // A request inserted after the reader's final drain sees the cancellation here
        if self.closed.is_cancelled() || self.outbound.send(Message::Text(text)).is_err() {
            lock_pending(&self.pending).remove(&id);
            return Err(ClientError::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response.into_result().map_err(ClientError::from),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                lock_pending(&self.pending).remove(&id);
                warn!(
                    target: "client.signaling",
                    request_id = id,
                    method,
                    timeout_ms = self.request_timeout.as_millis(),
                    "Signaling request timed out"
                );
                Err(ClientError::Timeout(self.request_timeout))
            }
        }
    }

    /// # Errors
    ///
    /// See [`SignalingClient::request`].
    pub async fn get_router_capabilities(&self) -> Result<RtpCapabilities, ClientError> {
        match self.request(Request::GetRouterCapabilities).await? {
            ResponseBody::RouterCapabilities { rtp_capabilities } => Ok(rtp_capabilities),
            other => Err(unexpected("get_router_capabilities", &other)),
        }
    }

    /// # Errors
    ///
    /// See [`SignalingClient::request`].
    pub async fn create_transport(&self) -> Result<TransportInfo, ClientError> {
        match self.request(Request::CreateTransport).await? {
            ResponseBody::TransportCreated(info) => Ok(info),
            other => Err(unexpected("create_transport", &other)),
        }
    }

    /// # Errors
    ///
    /// See [`SignalingClient::request`].
    pub async fn connect_transport(
        &self,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), ClientError> {
        match self
            .request(Request::ConnectTransport {
                transport_id,
                dtls_parameters,
            })
            .await?
        {
            ResponseBody::Ack => Ok(()),
            other => Err(unexpected("connect_transport", &other)),
        }
    }

    /// # Errors
    ///
    /// See [`SignalingClient::request`].
    pub async fn produce(
        &self,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        participant_id: ParticipantId,
    ) -> Result<ProducerId, ClientError> {
        match self
            .request(Request::Produce {
                transport_id,
                kind,
                rtp_parameters,
                participant_id,
            })
            .await?
        {
            ResponseBody::Produced { producer_id } => Ok(producer_id),
            other => Err(unexpected("produce", &other)),
        }
    }

    /// # Errors
    ///
    /// See [`SignalingClient::request`].
    pub async fn consume(
        &self,
        transport_id: TransportId,
        participant_ids: Vec<ParticipantId>,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<Vec<ConsumerInfo>, ClientError> {
        match self
            .request(Request::Consume {
                transport_id,
                participant_ids,
                rtp_capabilities,
            })
            .await?
        {
            ResponseBody::Consumed { consumers } => Ok(consumers),
            other => Err(unexpected("consume", &other)),
        }
    }

    /// # Errors
    ///
    /// See [`SignalingClient::request`].
    pub async fn resume_consumer(&self, consumer_id: ConsumerId) -> Result<(), ClientError> {
        match self.request(Request::ResumeConsumer { consumer_id }).await? {
            ResponseBody::Ack => Ok(()),
            other => Err(unexpected("resume_consumer", &other)),
        }
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&self) {
        self.closed.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                debug!(target: "client.signaling", "Socket task did not stop in time");
            }
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

fn unexpected(method: &str, body: &ResponseBody) -> ClientError {
    ClientError::UnexpectedResponse(format!("{method} answered with {body:?}"))
}

async fn read_responses(
    mut stream: SplitStream<WsStream>,
    pending: PendingMap,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match decode_response(&text) {
                Ok(response) => {
                    let waiter = lock_pending(&pending).remove(&response.id);
                    match waiter {
                        Some(waiter) => {
                            let _ = waiter.send(response);
                        }
                        None => {
                            debug!(
                                target: "client.signaling",
                                response_id = response.id,
                                "Response without a pending request"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "client.signaling", error = %e, "Undecodable response frame");
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(target: "client.signaling", error = %e, "Media control connection error");
                break;
            }
            Some(Ok(_)) => {}
        }
    }

    closed.cancel();
    let abandoned = lock_pending(&pending).drain().count();
    debug!(
        target: "client.signaling",
        abandoned,
        "Media control connection closed"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use signaling_protocol::codec::{decode_request, encode_response};
    use signaling_protocol::{ErrorCode, SignalError};
    use tokio::net::TcpListener;

    /// Scripted server: answers each request with `reply(request)`, or
    /// stays silent when it returns `None`.
    async fn scripted_server<F>(reply: F) -> Url
    where
        F: Fn(RequestEnvelope) -> Option<ResponseEnvelope> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request = decode_request(&text).unwrap();
                if let Some(response) = reply(request) {
                    let frame = encode_response(&response).unwrap();
                    if ws.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
            }
        });

        Url::parse(&format!("ws://{addr}/signal")).unwrap()
    }

    #[tokio::test]
    async fn test_request_ids_correlate() {
        let url = scripted_server(|envelope| {
            Some(ResponseEnvelope::ok(
                envelope.id,
                ResponseBody::RouterCapabilities {
                    rtp_capabilities: RtpCapabilities::default(),
                },
            ))
        })
        .await;

        let client = SignalingClient::connect(&url, None, Duration::from_secs(2))
            .await
            .unwrap();
        let caps = client.get_router_capabilities().await.unwrap();
        assert!(caps.is_empty());
        assert!(client.get_router_capabilities().await.is_ok());

        client.close().await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_server_error_maps_to_signal() {
        let url = scripted_server(|envelope| {
            Some(ResponseEnvelope::error(
                envelope.id,
                SignalError::new(ErrorCode::NotFound, "Consumer not found"),
            ))
        })
        .await;

        let client = SignalingClient::connect(&url, None, Duration::from_secs(2))
            .await
            .unwrap();
        let err = client
            .resume_consumer(ConsumerId::new())
            .await
            .unwrap_err();
        assert_eq!(err.signal_code(), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_unexpected_body() {
        let url = scripted_server(|envelope| Some(ResponseEnvelope::ok(envelope.id, ResponseBody::Ack))).await;

        let client = SignalingClient::connect(&url, None, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(matches!(
            client.create_transport().await,
            Err(ClientError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let url = scripted_server(|_| None).await;

        let client = SignalingClient::connect(&url, None, Duration::from_millis(100))
            .await
            .unwrap();
        let err = client.create_transport().await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_pending_fails_when_connection_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            // Read one request, then hang up without answering
            let _ = ws.next().await;
            let _ = ws.close(None).await;
        });

        let url = Url::parse(&format!("ws://{addr}/signal")).unwrap();
        let client = SignalingClient::connect(&url, None, Duration::from_secs(5))
            .await
            .unwrap();

        let err = client.create_transport().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));

        let err = client.create_transport().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let url = Url::parse("ws://127.0.0.1:1/signal").unwrap();
        let result = SignalingClient::connect(&url, Some("sess-1"), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::Connect(_))));
    }
}
