//! Raw signaling client for server-side tests.
//!
//! Sends one frame at a time and waits for the matching response, so tests
//! can assert on envelopes, error codes and malformed-frame handling.

use crate::fixtures::{client_rtp_capabilities, dtls_parameters, rtp_parameters};
use common::types::{ParticipantId, ProducerId, TransportId};
use futures_util::{SinkExt, StreamExt};
use signaling_protocol::codec::{decode_response, encode_request};
use signaling_protocol::rtp::MediaKind;
use signaling_protocol::{ConsumerInfo, Request, RequestEnvelope, ResponseBody, ResponseEnvelope};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// One signaling connection driven directly by a test.
pub struct SignalingTestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
}

impl SignalingTestClient {
    /// Connect to `ws_url` (see `TestMediaServer::ws_url`).
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket handshake fails.
    pub async fn connect(ws_url: &str) -> Result<Self, anyhow::Error> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", ws_url, e))?;
        Ok(Self { ws, next_id: 1 })
    }

    /// Send a request with the next id and return the full response envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the response cannot be decoded.
    pub async fn send(&mut self, request: Request) -> Result<ResponseEnvelope, anyhow::Error> {
        let id = self.next_id;
        self.next_id += 1;
        let text = encode_request(&RequestEnvelope { id, request })?;
        self.send_text(&text).await
    }

    /// Send a raw text frame and wait for the next response.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the response cannot be decoded.
    pub async fn send_text(&mut self, text: &str) -> Result<ResponseEnvelope, anyhow::Error> {
        self.ws.send(Message::Text(text.to_string())).await?;
        self.next_response().await
    }

    /// Send a binary frame and wait for the next response.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the response cannot be decoded.
    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<ResponseEnvelope, anyhow::Error> {
        self.ws.send(Message::Binary(data)).await?;
        self.next_response().await
    }

    async fn next_response(&mut self) -> Result<ResponseEnvelope, anyhow::Error> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(decode_response(&text)?),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(other)) => anyhow::bail!("Unexpected frame: {:?}", other),
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("Connection closed before a response arrived"),
            }
        }
    }

    /// Send a request and unwrap a successful body.
    ///
    /// # Errors
    ///
    /// Returns an error if the server answered with an error.
    pub async fn request(&mut self, request: Request) -> Result<ResponseBody, anyhow::Error> {
        self.send(request)
            .await?
            .into_result()
            .map_err(|e| anyhow::anyhow!("Signaling error {}: {}", e.code, e.message))
    }

    /// Create a transport and connect it with fixture DTLS parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if either request fails.
    pub async fn connected_transport(&mut self) -> Result<TransportId, anyhow::Error> {
        let ResponseBody::TransportCreated(info) = self.request(Request::CreateTransport).await?
        else {
            anyhow::bail!("create_transport returned an unexpected body");
        };

        self.request(Request::ConnectTransport {
            transport_id: info.transport_id,
            dtls_parameters: dtls_parameters(),
        })
        .await?;

        Ok(info.transport_id)
    }

    /// Produce one fixture track of `kind` for `participant_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the produce.
    pub async fn produce(
        &mut self,
        transport_id: TransportId,
        kind: MediaKind,
        participant_id: &str,
    ) -> Result<ProducerId, anyhow::Error> {
        match self
            .request(Request::Produce {
                transport_id,
                kind,
                rtp_parameters: rtp_parameters(kind),
                participant_id: ParticipantId::from(participant_id),
            })
            .await?
        {
            ResponseBody::Produced { producer_id } => Ok(producer_id),
            other => anyhow::bail!("produce returned {:?}", other),
        }
    }

    /// Consume `participant_ids` with fixture client capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the consume.
    pub async fn consume(
        &mut self,
        transport_id: TransportId,
        participant_ids: &[&str],
    ) -> Result<Vec<ConsumerInfo>, anyhow::Error> {
        match self
            .request(Request::Consume {
                transport_id,
                participant_ids: participant_ids.iter().map(|id| ParticipantId::from(*id)).collect(),
                rtp_capabilities: client_rtp_capabilities(),
            })
            .await?
        {
            ResponseBody::Consumed { consumers } => Ok(consumers),
            other => anyhow::bail!("consume returned {:?}", other),
        }
    }

    /// Close the connection without waiting for the server.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
