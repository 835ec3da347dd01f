//! Client session orchestrator.
//!
//! Drives one examinee or proctor through the session sequence:
//!
//! ```text
//! connect()          admission → media connect → capability load
//! publish()          capture → send transport → produce per track
//! subscribe(ids)     recv transport → consume → RemoteStream per participant
//! connect_events()   backend event connection
//! next_event()       participant_connected → incremental subscribe
//! disconnect()       close both connections, release capture
//! ```
//!
//! Every step can be retried. `connect` skips admission while a session id
//! is held (and, for examinees, capture is live) and keeps a live media
//! connection instead of opening a second one. Transports are created once
//! per direction. Step failures come back as `SessionError` tagged with the
//! step; resources from steps that already completed stay in place.

use crate::admission::Admission;
use crate::capture::{track_of_kind, LocalTrack, MediaCapture};
use crate::config::{ClientConfig, Role};
use crate::device::Device;
use crate::errors::{ClientError, SessionError, SessionStep};
use crate::events::EventChannel;
use crate::signaling::SignalingClient;
use crate::transport::{
    LocalProducer, LocalTransport, RemoteConsumer, RemoteStream, TransportDirection,
};
use common::types::{ConsumerId, ParticipantId, TransportId};
use signaling_protocol::rtp::MediaKind;
use signaling_protocol::{BackendCommand, BackendEvent, ErrorCode};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What `next_event` reports to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A participant joined. `streaming` is true once a remote stream for
    /// them exists locally.
    ParticipantConnected {
        participant_id: ParticipantId,
        streaming: bool,
    },
    /// A participant left; their remote stream has been dropped.
    ParticipantDisconnected { participant_id: ParticipantId },
    CheatingDetected {
        participant_id: ParticipantId,
        reason: Option<String>,
        confidence: Option<f64>,
    },
    Message {
        text: String,
        sender_id: Option<ParticipantId>,
    },
    BackendError { message: String },
}

/// One client's session state and connections.
pub struct SessionOrchestrator {
    config: ClientConfig,
    admission: Arc<dyn Admission>,
    capture: Arc<dyn MediaCapture>,
    device: Device,
    session_id: Option<String>,
    signaling: Option<SignalingClient>,
    events: Option<EventChannel>,
    local_tracks: Vec<LocalTrack>,
    send_transport: Option<LocalTransport>,
    recv_transport: Option<LocalTransport>,
    producers: Vec<LocalProducer>,
    streams: HashMap<ParticipantId, RemoteStream>,
}

fn fail(step: SessionStep, error: ClientError) -> SessionError {
    warn!(
        target: "client.orchestrator",
        step = %step,
        error = %error,
        "Session step failed"
    );
    SessionError::new(step, error)
}

impl SessionOrchestrator {
    #[must_use]
    pub fn new(
        config: ClientConfig,
        admission: Arc<dyn Admission>,
        capture: Arc<dyn MediaCapture>,
        device: Device,
    ) -> Self {
        Self {
            config,
            admission,
            capture,
            device,
            session_id: None,
            signaling: None,
            events: None,
            local_tracks: Vec::new(),
            send_transport: None,
            recv_transport: None,
            producers: Vec::new(),
            streams: HashMap::new(),
        }
    }

    /// Admission, media connection and capability load.
    ///
    /// # Errors
    ///
    /// Returns the first failing step; later steps are not attempted.
    #[instrument(skip_all, fields(exam_id = %self.config.exam_id, role = %self.config.role))]
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.admit()
            .await
            .map_err(|e| fail(SessionStep::Admission, e))?;

        let fresh = self
            .connect_media()
            .await
            .map_err(|e| fail(SessionStep::MediaConnect, e))?;

        if fresh || !self.device.is_loaded() {
            self.load_capabilities()
                .await
                .map_err(|e| fail(SessionStep::CapabilityLoad, e))?;
        }

        info!(target: "client.orchestrator", "Session connected");
        Ok(())
    }

    async fn admit(&mut self) -> Result<(), ClientError> {
        let capture_live = self.config.role == Role::Proctor || !self.local_tracks.is_empty();
        if self.session_id.is_some() && capture_live {
            debug!(target: "client.orchestrator", "Already admitted, skipping admission");
            return Ok(());
        }

        let session_id = self
            .admission
            .join(&self.config.exam_id, self.config.role)
            .await?;
        debug!(target: "client.orchestrator", "Admitted to exam session");
        self.session_id = Some(session_id);
        Ok(())
    }

    /// Returns true when a new connection was opened.
    async fn connect_media(&mut self) -> Result<bool, ClientError> {
        if self.signaling.as_ref().is_some_and(|s| !s.is_closed()) {
            return Ok(false);
        }

        if let Some(stale) = self.signaling.take() {
            stale.close().await;
            // Server resources died with the old connection
            self.clear_media_state();
        }

        let client = SignalingClient::connect(
            &self.config.media_url,
            self.session_id.as_deref(),
            self.config.request_timeout,
        )
        .await?;
        self.signaling = Some(client);
        Ok(true)
    }

    async fn load_capabilities(&mut self) -> Result<(), ClientError> {
        let signaling = self.signaling.as_ref().ok_or(ClientError::NotConnected)?;
        let router_capabilities = signaling.get_router_capabilities().await?;
        self.device.load(&router_capabilities)
    }

    /// Publish local audio and video.
    ///
    /// Capture is acquired once and reused by later calls. A kind that
    /// already has a producer is skipped. A missing or failing track does
    /// not stop the other one.
    ///
    /// # Errors
    ///
    /// Fails when not connected, when capture fails or yields nothing, when
    /// the send transport cannot be set up, or when no track could be
    /// produced at all.
    #[instrument(skip_all, fields(participant_id = %self.config.participant_id))]
    pub async fn publish(&mut self) -> Result<Vec<LocalProducer>, SessionError> {
        self.publish_tracks()
            .await
            .map_err(|e| fail(SessionStep::Publish, e))
    }

    async fn publish_tracks(&mut self) -> Result<Vec<LocalProducer>, ClientError> {
        let signaling = self.signaling.as_ref().ok_or(ClientError::NotConnected)?;
        if !self.device.is_loaded() {
            return Err(ClientError::DeviceNotLoaded);
        }

        if self.local_tracks.is_empty() {
            self.local_tracks = self.capture.acquire().await?;
        }
        if self.local_tracks.is_empty() {
            return Err(ClientError::Capture(
                "No audio or video track available".to_string(),
            ));
        }

        let transport_id = ensure_transport(
            signaling,
            &self.device,
            &mut self.send_transport,
            TransportDirection::Send,
        )
        .await?;

        let mut first_error = None;
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if self.producers.iter().any(|p| p.kind == kind) {
                continue;
            }
            let Some(track) = track_of_kind(&self.local_tracks, kind) else {
                debug!(target: "client.orchestrator", kind = %kind, "No local track of this kind");
                continue;
            };

            let mid = self.producers.len().to_string();
            match produce_track(
                signaling,
                &self.device,
                transport_id,
                track,
                &self.config.participant_id,
                mid,
            )
            .await
            {
                Ok(producer) => {
                    info!(
                        target: "client.orchestrator",
                        kind = %kind,
                        producer_id = %producer.producer_id,
                        "Track published"
                    );
                    self.producers.push(producer);
                }
                Err(e) => {
                    warn!(
                        target: "client.orchestrator",
                        kind = %kind,
                        error = %e,
                        "Failed to publish track"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if self.producers.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(self.producers.clone())
    }

    /// Consume the given participants' tracks.
    ///
    /// Returns the participants that now have streams from this call, in
    /// the order the server returned them. Participants that are not
    /// publishing are simply absent. An empty list is a no-op.
    ///
    /// # Errors
    ///
    /// Fails when not connected or when the receive transport or the
    /// consume request fails.
    #[instrument(skip_all, fields(count = participant_ids.len()))]
    pub async fn subscribe(
        &mut self,
        participant_ids: Vec<ParticipantId>,
    ) -> Result<Vec<ParticipantId>, SessionError> {
        self.consume(participant_ids)
            .await
            .map_err(|e| fail(SessionStep::Subscribe, e))
    }

    async fn consume(
        &mut self,
        participant_ids: Vec<ParticipantId>,
    ) -> Result<Vec<ParticipantId>, ClientError> {
        if participant_ids.is_empty() {
            return Ok(Vec::new());
        }

        let signaling = self.signaling.as_ref().ok_or(ClientError::NotConnected)?;
        let rtp_capabilities = self.device.rtp_capabilities()?.clone();

        let transport_id = ensure_transport(
            signaling,
            &self.device,
            &mut self.recv_transport,
            TransportDirection::Recv,
        )
        .await?;

        let consumers = signaling
            .consume(transport_id, participant_ids, rtp_capabilities)
            .await?;

        let mut streaming = Vec::new();
        for info in consumers {
            let participant_id = info.participant_id.clone();
            self.streams
                .entry(participant_id.clone())
                .or_insert_with(|| RemoteStream::new(participant_id.clone()))
                .add_consumer(RemoteConsumer::new(info));
            if !streaming.contains(&participant_id) {
                streaming.push(participant_id);
            }
        }

        debug!(
            target: "client.orchestrator",
            participants = streaming.len(),
            "Remote streams added"
        );
        Ok(streaming)
    }

    /// Subscribe to every examinee the backend lists as connected.
    ///
    /// # Errors
    ///
    /// Fails when no session is held, the participant list call fails, or
    /// the subscribe fails.
    pub async fn subscribe_connected(&mut self) -> Result<Vec<ParticipantId>, SessionError> {
        let session_id = self
            .session_id
            .as_deref()
            .ok_or_else(|| fail(SessionStep::Subscribe, ClientError::NotConnected))?;

        let examinees = self
            .admission
            .connected_examinees(&self.config.exam_id, session_id)
            .await
            .map_err(|e| fail(SessionStep::Subscribe, e))?;

        self.subscribe(examinees.into_iter().map(|e| e.id).collect())
            .await
    }

    /// Open the backend event connection. A live connection is kept.
    ///
    /// # Errors
    ///
    /// Returns `SessionStep::EventConnect` if the connection cannot be opened.
    pub async fn connect_events(&mut self) -> Result<(), SessionError> {
        if self.events.as_ref().is_some_and(|e| !e.is_closed()) {
            return Ok(());
        }

        let channel = EventChannel::connect(
            &self.config.events_url,
            &self.config.exam_id,
            self.session_id.as_deref(),
        )
        .await
        .map_err(|e| fail(SessionStep::EventConnect, e))?;
        self.events = Some(channel);
        Ok(())
    }

    /// Wait for the next backend event and apply it to local state.
    ///
    /// Returns `None` when no event connection is open or it has closed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = self.events.as_mut()?.next_event().await?;

        let event = match event {
            BackendEvent::ParticipantConnected { participant_id } => {
                let streaming = self.on_participant_connected(&participant_id).await;
                SessionEvent::ParticipantConnected {
                    participant_id,
                    streaming,
                }
            }
            BackendEvent::ParticipantDisconnected { participant_id } => {
                if self.streams.remove(&participant_id).is_some() {
                    debug!(
                        target: "client.orchestrator",
                        participant_id = %participant_id,
                        "Remote stream dropped"
                    );
                }
                SessionEvent::ParticipantDisconnected { participant_id }
            }
            BackendEvent::CheatingDetected {
                participant_id,
                reason,
                confidence,
            } => {
                info!(
                    target: "client.orchestrator",
                    participant_id = %participant_id,
                    "Cheating signal received"
                );
                SessionEvent::CheatingDetected {
                    participant_id,
                    reason,
                    confidence,
                }
            }
            BackendEvent::Message { text, sender_id } => SessionEvent::Message { text, sender_id },
            BackendEvent::Error { message } => {
                warn!(target: "client.orchestrator", message = %message, "Backend reported an error");
                SessionEvent::BackendError { message }
            }
        };
        Some(event)
    }

    async fn on_participant_connected(&mut self, participant_id: &ParticipantId) -> bool {
        if self.config.role != Role::Proctor || self.signaling.is_none() {
            return false;
        }
        if self.streams.contains_key(participant_id) && !self.refresh_stream(participant_id).await {
            return true;
        }

        // Failures are already logged by `subscribe`
        match self.subscribe(vec![participant_id.clone()]).await {
            Ok(streaming) => streaming.contains(participant_id),
            Err(_) => false,
        }
    }

    /// Re-check an existing stream after its participant connected again.
    ///
    /// Resumed consumers are resumed once more, which the server answers
    /// with `not_found` when their producer has closed; those are dropped.
    /// Returns `true` when nothing live is left and the stream was removed.
    async fn refresh_stream(&mut self, participant_id: &ParticipantId) -> bool {
        let Some(signaling) = self.signaling.as_ref() else {
            return false;
        };
        let Some(stream) = self.streams.get_mut(participant_id) else {
            return true;
        };

        let resumed: Vec<ConsumerId> = stream
            .consumers()
            .iter()
            .filter(|c| c.is_resumed())
            .map(RemoteConsumer::id)
            .collect();
        for consumer_id in resumed {
            match signaling.resume_consumer(consumer_id).await {
                Err(e) if e.signal_code() == Some(ErrorCode::NotFound) => {
                    stream.remove_consumer(consumer_id);
                }
                Err(e) => {
                    warn!(
                        target: "client.orchestrator",
                        consumer_id = %consumer_id,
                        error = %e,
                        "Could not check remote consumer"
                    );
                }
                Ok(()) => {}
            }
        }

        if !stream.is_empty() {
            return false;
        }
        self.streams.remove(participant_id);
        debug!(
            target: "client.orchestrator",
            participant_id = %participant_id,
            "Stale remote stream dropped"
        );
        true
    }

    /// Send a chat message; empty `recipients` broadcasts.
    ///
    /// # Errors
    ///
    /// Returns `SessionStep::Messaging` when the event connection is not open.
    pub fn send_message(
        &self,
        text: impl Into<String>,
        recipients: Vec<ParticipantId>,
    ) -> Result<(), SessionError> {
        let events = self
            .events
            .as_ref()
            .ok_or_else(|| fail(SessionStep::Messaging, ClientError::NotConnected))?;

        events
            .send(&BackendCommand::SendMessage {
                text: text.into(),
                recipients,
            })
            .map_err(|e| fail(SessionStep::Messaging, e))
    }

    /// Start media flow on a consumer once a sink is attached.
    ///
    /// # Errors
    ///
    /// Returns `SessionStep::Resume` when not connected or the server
    /// rejects the consumer id.
    pub async fn resume_consumer(&mut self, consumer_id: ConsumerId) -> Result<(), SessionError> {
        let signaling = self
            .signaling
            .as_ref()
            .ok_or_else(|| fail(SessionStep::Resume, ClientError::NotConnected))?;

        if let Err(e) = signaling.resume_consumer(consumer_id).await {
            if e.signal_code() == Some(ErrorCode::NotFound) {
                self.forget_consumer(consumer_id);
            }
            return Err(fail(SessionStep::Resume, e));
        }

        if let Some(consumer) = self
            .streams
            .values_mut()
            .find_map(|stream| stream.consumer_mut(consumer_id))
        {
            consumer.mark_resumed();
        }
        Ok(())
    }

    /// Drop a consumer whose producer is gone, and its stream once empty.
    fn forget_consumer(&mut self, consumer_id: ConsumerId) {
        self.streams.retain(|_, stream| {
            stream.remove_consumer(consumer_id);
            !stream.is_empty()
        });
    }

    /// Close both connections and release capture. Safe to call at any
    /// point, including after a partial setup, and more than once.
    #[instrument(skip_all)]
    pub async fn disconnect(&mut self) {
        if let Some(events) = self.events.take() {
            events.close().await;
        }
        if let Some(signaling) = self.signaling.take() {
            signaling.close().await;
        }
        if !self.local_tracks.is_empty() {
            self.capture.release(&self.local_tracks).await;
            self.local_tracks.clear();
        }
        self.clear_media_state();
        self.session_id = None;

        info!(target: "client.orchestrator", "Session disconnected");
    }

    fn clear_media_state(&mut self) {
        self.send_transport = None;
        self.recv_transport = None;
        self.producers.clear();
        self.streams.clear();
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.config.role
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[must_use]
    pub fn is_media_connected(&self) -> bool {
        self.signaling.as_ref().is_some_and(|s| !s.is_closed())
    }

    #[must_use]
    pub fn is_events_connected(&self) -> bool {
        self.events.as_ref().is_some_and(|e| !e.is_closed())
    }

    #[must_use]
    pub fn producers(&self) -> &[LocalProducer] {
        &self.producers
    }

    #[must_use]
    pub fn local_tracks(&self) -> &[LocalTrack] {
        &self.local_tracks
    }

    #[must_use]
    pub fn send_transport(&self) -> Option<&LocalTransport> {
        self.send_transport.as_ref()
    }

    #[must_use]
    pub fn recv_transport(&self) -> Option<&LocalTransport> {
        self.recv_transport.as_ref()
    }

    /// Remote streams keyed by participant.
    #[must_use]
    pub fn streams(&self) -> &HashMap<ParticipantId, RemoteStream> {
        &self.streams
    }

    #[must_use]
    pub fn stream(&self, participant_id: &ParticipantId) -> Option<&RemoteStream> {
        self.streams.get(participant_id)
    }
}

/// Create and connect the transport in `slot` unless it already exists.
async fn ensure_transport(
    signaling: &SignalingClient,
    device: &Device,
    slot: &mut Option<LocalTransport>,
    direction: TransportDirection,
) -> Result<TransportId, ClientError> {
    if let Some(transport) = slot {
        return Ok(transport.id());
    }

    let info = signaling.create_transport().await?;
    let transport_id = info.transport_id;
    signaling
        .connect_transport(transport_id, device.dtls_parameters().clone())
        .await?;

    debug!(
        target: "client.orchestrator",
        transport_id = %transport_id,
        direction = ?direction,
        "Transport connected"
    );
    *slot = Some(LocalTransport::new(info, direction));
    Ok(transport_id)
}

async fn produce_track(
    signaling: &SignalingClient,
    device: &Device,
    transport_id: TransportId,
    track: &LocalTrack,
    participant_id: &ParticipantId,
    mid: String,
) -> Result<LocalProducer, ClientError> {
    let rtp_parameters = device.send_rtp_parameters(track.kind, mid)?;
    let producer_id = signaling
        .produce(
            transport_id,
            track.kind,
            rtp_parameters,
            participant_id.clone(),
        )
        .await?;

    Ok(LocalProducer {
        producer_id,
        kind: track.kind,
        track_id: track.id.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::admission::mock::MockAdmission;
    use crate::capture::mock::StaticCapture;
    use tokio::net::TcpListener;

    async fn unreachable_ws_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}/signal")
    }

    async fn config(role: &str) -> ClientConfig {
        let url = unreachable_ws_url().await;
        let vars = HashMap::from([
            ("EXAM_ID".to_string(), "exam-1".to_string()),
            ("EXAM_PARTICIPANT_ID".to_string(), "examinee-1".to_string()),
            ("EXAM_CREDENTIAL".to_string(), "secret".to_string()),
            ("EXAM_ROLE".to_string(), role.to_string()),
            ("EXAM_MEDIA_URL".to_string(), url.clone()),
            ("EXAM_EVENTS_URL".to_string(), url),
        ]);
        ClientConfig::from_vars(&vars).unwrap()
    }

    fn orchestrator(
        config: ClientConfig,
        admission: Arc<MockAdmission>,
        capture: Arc<StaticCapture>,
    ) -> SessionOrchestrator {
        SessionOrchestrator::new(config, admission, capture, Device::default())
    }

    #[tokio::test]
    async fn test_admission_rejection_stops_connect() {
        let admission = Arc::new(MockAdmission::rejecting());
        let mut session = orchestrator(
            config("examinee").await,
            Arc::clone(&admission),
            Arc::new(StaticCapture::audio_and_video()),
        );

        let err = session.connect().await.unwrap_err();
        assert_eq!(err.step, SessionStep::Admission);
        assert!(matches!(err.source, ClientError::Admission(_)));
        assert!(session.session_id().is_none());
        assert!(!session.is_media_connected());
    }

    #[tokio::test]
    async fn test_media_connect_failure_keeps_admission() {
        let admission = Arc::new(MockAdmission::admitting("sess-1"));
        let mut session = orchestrator(
            config("proctor").await,
            Arc::clone(&admission),
            Arc::new(StaticCapture::audio_and_video()),
        );

        let err = session.connect().await.unwrap_err();
        assert_eq!(err.step, SessionStep::MediaConnect);
        assert!(matches!(err.source, ClientError::Connect(_)));
        assert_eq!(session.session_id(), Some("sess-1"));

        // A proctor with a session is not re-admitted on retry
        let _ = session.connect().await.unwrap_err();
        assert_eq!(admission.join_calls(), 1);
    }

    #[tokio::test]
    async fn test_examinee_without_capture_is_readmitted() {
        let admission = Arc::new(MockAdmission::admitting("sess-1"));
        let mut session = orchestrator(
            config("examinee").await,
            Arc::clone(&admission),
            Arc::new(StaticCapture::audio_and_video()),
        );

        let _ = session.connect().await.unwrap_err();
        let _ = session.connect().await.unwrap_err();
        assert_eq!(admission.join_calls(), 2);
    }

    #[tokio::test]
    async fn test_steps_before_connect_report_not_connected() {
        let capture = Arc::new(StaticCapture::audio_and_video());
        let mut session = orchestrator(
            config("examinee").await,
            Arc::new(MockAdmission::admitting("sess-1")),
            Arc::clone(&capture),
        );

        let err = session.publish().await.unwrap_err();
        assert_eq!(err.step, SessionStep::Publish);
        assert!(matches!(err.source, ClientError::NotConnected));
        assert_eq!(capture.acquire_count(), 0);

        let err = session
            .subscribe(vec![ParticipantId::from("examinee-2")])
            .await
            .unwrap_err();
        assert_eq!(err.step, SessionStep::Subscribe);

        let err = session.subscribe_connected().await.unwrap_err();
        assert!(matches!(err.source, ClientError::NotConnected));

        let err = session.send_message("hello", vec![]).unwrap_err();
        assert_eq!(err.step, SessionStep::Messaging);

        let err = session.resume_consumer(ConsumerId::new()).await.unwrap_err();
        assert_eq!(err.step, SessionStep::Resume);

        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_subscribe_is_noop() {
        let mut session = orchestrator(
            config("proctor").await,
            Arc::new(MockAdmission::admitting("sess-1")),
            Arc::new(StaticCapture::audio_and_video()),
        );

        let streaming = session.subscribe(Vec::new()).await.unwrap();
        assert!(streaming.is_empty());
        assert!(session.recv_transport().is_none());
    }

    #[tokio::test]
    async fn test_event_connect_failure() {
        let mut session = orchestrator(
            config("proctor").await,
            Arc::new(MockAdmission::admitting("sess-1")),
            Arc::new(StaticCapture::audio_and_video()),
        );

        let err = session.connect_events().await.unwrap_err();
        assert_eq!(err.step, SessionStep::EventConnect);
        assert!(!session.is_events_connected());
    }

    #[tokio::test]
    async fn test_disconnect_after_partial_setup_is_idempotent() {
        let capture = Arc::new(StaticCapture::audio_and_video());
        let mut session = orchestrator(
            config("examinee").await,
            Arc::new(MockAdmission::admitting("sess-1")),
            Arc::clone(&capture),
        );
        let _ = session.connect().await.unwrap_err();

        session.disconnect().await;
        session.disconnect().await;

        assert!(session.session_id().is_none());
        assert!(session.producers().is_empty());
        assert!(session.streams().is_empty());
        // Nothing was acquired, so nothing is released
        assert_eq!(capture.release_count(), 0);
    }
}
