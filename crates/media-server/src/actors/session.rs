//! `ConnectionSession` - media state owned by one client connection.
//!
//! The session owns its transports and producers; consumers live on the
//! receive transports. Every resource belongs to exactly one session and is
//! released by [`ConnectionSession::teardown`].
//!
//! The session is not shared: its `ConnectionActor` owns it and serializes
//! every operation through the actor mailbox.

use crate::engine::{Producer, ProducerDirectory, Router, Transport};
use crate::errors::MediaServerError;
use crate::observability::metrics;
use crate::pool::WorkerPool;
use crate::resolver;
use common::types::{ConsumerId, ParticipantId, ProducerId, TransportId, WorkerId};
use signaling_protocol::rtp::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters};
use signaling_protocol::{ConsumerInfo, Request, ResponseBody, TransportInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Resource counts of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

pub struct ConnectionSession {
    connection_id: String,
    worker_id: WorkerId,
    router: Arc<Router>,
    directory: Arc<ProducerDirectory>,
    transports: HashMap<TransportId, Transport>,
    producers: HashMap<ProducerId, Producer>,
    torn_down: bool,
}

impl ConnectionSession {
    /// Create an empty session on the next worker of the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot provide a worker.
    pub async fn create(
        connection_id: impl Into<String>,
        pool: &WorkerPool,
        directory: Arc<ProducerDirectory>,
    ) -> Result<Self, MediaServerError> {
        let worker = pool.next().await?;
        let session = Self {
            connection_id: connection_id.into(),
            worker_id: worker.id(),
            router: Arc::clone(worker.router()),
            directory,
            transports: HashMap::new(),
            producers: HashMap::new(),
            torn_down: false,
        };

        metrics::session_opened();
        info!(
            target: "media.session",
            connection_id = %session.connection_id,
            worker_id = %session.worker_id,
            router_id = %session.router.id(),
            "Session created"
        );

        Ok(session)
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Dispatch one signaling request.
    ///
    /// # Errors
    ///
    /// Returns the operation's error; the session stays usable.
    pub async fn handle(&mut self, request: Request) -> Result<ResponseBody, MediaServerError> {
        match request {
            Request::GetRouterCapabilities => Ok(ResponseBody::RouterCapabilities {
                rtp_capabilities: self.router_capabilities()?,
            }),
            Request::CreateTransport => self.create_transport().map(ResponseBody::TransportCreated),
            Request::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => self
                .connect_transport(transport_id, dtls_parameters)
                .map(|()| ResponseBody::Ack),
            Request::Produce {
                transport_id,
                kind,
                rtp_parameters,
                participant_id,
            } => self
                .produce(transport_id, kind, rtp_parameters, participant_id)
                .await
                .map(|producer_id| ResponseBody::Produced { producer_id }),
            Request::Consume {
                transport_id,
                participant_ids,
                rtp_capabilities,
            } => self
                .consume(transport_id, &participant_ids, &rtp_capabilities)
                .await
                .map(|consumers| ResponseBody::Consumed { consumers }),
            Request::ResumeConsumer { consumer_id } => {
                self.resume_consumer(consumer_id).map(|()| ResponseBody::Ack)
            }
        }
    }

    fn ensure_live(&self) -> Result<(), MediaServerError> {
        if self.torn_down {
            Err(MediaServerError::SessionNotFound)
        } else {
            Ok(())
        }
    }

    fn transport_mut(
        &mut self,
        transport_id: TransportId,
    ) -> Result<&mut Transport, MediaServerError> {
        self.ensure_live()?;
        self.transports
            .get_mut(&transport_id)
            .ok_or(MediaServerError::TransportNotFound(transport_id))
    }

    /// The router's RTP capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::SessionNotFound`] after teardown.
    pub fn router_capabilities(&self) -> Result<RtpCapabilities, MediaServerError> {
        self.ensure_live()?;
        Ok(self.router.rtp_capabilities().clone())
    }

    /// Add a transport. Duplicate ids are a no-op returning `false`.
    pub fn register_transport(&mut self, transport: Transport) -> bool {
        if self.torn_down || self.transports.contains_key(&transport.id()) {
            return false;
        }
        self.transports.insert(transport.id(), transport);
        metrics::transport_opened();
        true
    }

    /// Add a producer and publish it in the directory. Duplicate ids are a
    /// no-op returning `false`.
    pub async fn register_producer(&mut self, producer: Producer) -> bool {
        if self.torn_down || self.producers.contains_key(&producer.id()) {
            return false;
        }
        if let Some(transport) = self.transports.get_mut(&producer.transport_id()) {
            transport.attach_producer(producer.id());
        }
        self.directory.register(producer.clone()).await;
        self.producers.insert(producer.id(), producer);
        metrics::producer_opened();
        true
    }

    /// Create a transport on the session's router.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::SessionNotFound`] after teardown.
    pub fn create_transport(&mut self) -> Result<TransportInfo, MediaServerError> {
        self.ensure_live()?;
        let transport = self.router.create_transport();
        let info = transport.info();
        self.register_transport(transport);

        debug!(
            target: "media.session",
            connection_id = %self.connection_id,
            transport_id = %info.transport_id,
            "Transport created"
        );
        Ok(info)
    }

    /// Complete the DTLS handshake of a transport.
    ///
    /// # Errors
    ///
    /// `TransportNotFound`, `Negotiation` or `InvalidState`.
    pub fn connect_transport(
        &mut self,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), MediaServerError> {
        self.transport_mut(transport_id)?.connect(dtls_parameters)
    }

    /// Publish a stream on a send transport.
    ///
    /// A second producer for the same participant and kind on this session
    /// closes the earlier one.
    ///
    /// # Errors
    ///
    /// `TransportNotFound`, `InvalidState` (not connected) or `Negotiation`
    /// (unsupported codec, kind mismatch).
    pub async fn produce(
        &mut self,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        participant_id: ParticipantId,
    ) -> Result<ProducerId, MediaServerError> {
        self.transport_mut(transport_id)?.ensure_media_ready()?;
        self.router.validate_produce(kind, &rtp_parameters)?;

        let superseded: Vec<ProducerId> = self
            .producers
            .values()
            .filter(|p| p.participant_id() == &participant_id && p.kind() == kind)
            .map(Producer::id)
            .collect();
        for producer_id in superseded {
            debug!(
                target: "media.session",
                connection_id = %self.connection_id,
                producer_id = %producer_id,
                participant_id = %participant_id,
                kind = %kind,
                "Superseding earlier producer"
            );
            self.close_producer(producer_id).await;
        }

        let producer = Producer::new(
            participant_id,
            kind,
            rtp_parameters,
            transport_id,
            self.router.id(),
        );
        let producer_id = producer.id();
        self.register_producer(producer).await;

        info!(
            target: "media.session",
            connection_id = %self.connection_id,
            transport_id = %transport_id,
            producer_id = %producer_id,
            kind = %kind,
            "Producer created"
        );
        Ok(producer_id)
    }

    /// Subscribe to the streams of `participant_ids` on a receive transport.
    ///
    /// # Errors
    ///
    /// `TransportNotFound`, `EmptyTargetList` or `InvalidState`. Missing and
    /// incompatible targets are omitted from the result.
    pub async fn consume(
        &mut self,
        transport_id: TransportId,
        participant_ids: &[ParticipantId],
        caps: &RtpCapabilities,
    ) -> Result<Vec<ConsumerInfo>, MediaServerError> {
        let router = Arc::clone(&self.router);
        let directory = Arc::clone(&self.directory);
        let transport = self.transport_mut(transport_id)?;
        if participant_ids.is_empty() {
            return Err(MediaServerError::EmptyTargetList);
        }
        transport.ensure_media_ready()?;

        let consumers =
            resolver::resolve_consumers(&directory, &router, transport, participant_ids, caps)
                .await?;
        metrics::record_consumers_created(consumers.len());
        Ok(consumers)
    }

    /// Start forwarding a paused consumer.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::ConsumerNotFound`] for an unknown id or a
    /// consumer whose producer has closed.
    pub fn resume_consumer(&mut self, consumer_id: ConsumerId) -> Result<(), MediaServerError> {
        self.ensure_live()?;
        for transport in self.transports.values_mut() {
            transport.prune_closed_consumers();
        }
        let consumer = self
            .transports
            .values()
            .find_map(|t| t.consumer(consumer_id))
            .ok_or(MediaServerError::ConsumerNotFound(consumer_id))?;

        consumer.resume();
        debug!(
            target: "media.session",
            connection_id = %self.connection_id,
            consumer_id = %consumer_id,
            "Consumer resumed"
        );
        Ok(())
    }

    /// Engine report of a DTLS failure: close and forget the transport.
    ///
    /// Returns `false` if the transport is unknown.
    pub async fn handle_dtls_closed(&mut self, transport_id: TransportId) -> bool {
        let Some(mut transport) = self.transports.remove(&transport_id) else {
            return false;
        };
        info!(
            target: "media.session",
            connection_id = %self.connection_id,
            transport_id = %transport_id,
            "DTLS closed, closing transport"
        );
        self.close_transport(&mut transport).await;
        true
    }

    /// Release every transport, producer and consumer. Idempotent.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let snapshot = self.snapshot();
        let transports: Vec<Transport> = self.transports.drain().map(|(_, t)| t).collect();
        for mut transport in transports {
            self.close_transport(&mut transport).await;
        }

        // Producers whose transport was already gone
        let orphans: Vec<ProducerId> = self.producers.keys().copied().collect();
        for producer_id in orphans {
            self.close_producer(producer_id).await;
        }

        metrics::session_closed();
        info!(
            target: "media.session",
            connection_id = %self.connection_id,
            transports = snapshot.transports,
            producers = snapshot.producers,
            consumers = snapshot.consumers,
            "Session torn down"
        );
    }

    /// Current resource counts.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            transports: self.transports.len(),
            producers: self.producers.len(),
            consumers: self.transports.values().map(Transport::consumer_count).sum(),
        }
    }

    async fn close_transport(&mut self, transport: &mut Transport) {
        for producer_id in transport.close() {
            self.close_producer(producer_id).await;
        }
        metrics::transport_closed();
    }

    async fn close_producer(&mut self, producer_id: ProducerId) {
        let Some(producer) = self.producers.remove(&producer_id) else {
            return;
        };
        producer.close();
        self.directory.unregister(producer_id).await;
        if let Some(transport) = self.transports.get_mut(&producer.transport_id()) {
            transport.detach_producer(producer_id);
        }
        metrics::producer_closed();
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if !self.torn_down {
            // Closed producers are skipped by the directory until unregistered
            for producer in self.producers.values() {
                if producer.close() {
                    metrics::producer_closed();
                }
            }
            for transport in self.transports.values_mut() {
                transport.close();
                metrics::transport_closed();
            }
            metrics::session_closed();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ListenConfig;
    use crate::engine::default_media_codecs;
    use signaling_protocol::rtp::{
        format_fingerprint, DtlsFingerprint, DtlsRole, RtpCodecCapability, RtpCodecParameters,
    };
    use tokio_util::sync::CancellationToken;

    fn pool() -> WorkerPool {
        WorkerPool::initialize(
            2,
            &default_media_codecs(),
            &ListenConfig::default(),
            CancellationToken::new(),
        )
        .unwrap()
    }

    fn dtls() -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: format_fingerprint(&[0x5A; 32]),
            }],
        }
    }

    fn rtp(kind: MediaKind) -> RtpParameters {
        let capability = match kind {
            MediaKind::Audio => RtpCodecCapability::audio("audio/opus", 48000, 2),
            MediaKind::Video => RtpCodecCapability::video("video/VP8", 90000),
        };
        RtpParameters {
            codecs: vec![RtpCodecParameters::from_capability(&capability, 100)],
            ..RtpParameters::default()
        }
    }

    async fn connected(session: &mut ConnectionSession) -> TransportId {
        let info = session.create_transport().unwrap();
        session.connect_transport(info.transport_id, dtls()).unwrap();
        info.transport_id
    }

    #[tokio::test]
    async fn test_sessions_are_assigned_round_robin() {
        let pool = pool();
        let directory = Arc::new(ProducerDirectory::new());
        let a = ConnectionSession::create("a", &pool, Arc::clone(&directory))
            .await
            .unwrap();
        let b = ConnectionSession::create("b", &pool, Arc::clone(&directory))
            .await
            .unwrap();
        let c = ConnectionSession::create("c", &pool, directory).await.unwrap();
        assert_eq!(a.worker_id(), WorkerId(0));
        assert_eq!(b.worker_id(), WorkerId(1));
        assert_eq!(c.worker_id(), WorkerId(0));
    }

    #[tokio::test]
    async fn test_produce_requires_connected_transport() {
        let pool = pool();
        let mut session =
            ConnectionSession::create("conn", &pool, Arc::new(ProducerDirectory::new()))
                .await
                .unwrap();
        let info = session.create_transport().unwrap();

        let err = session
            .produce(
                info.transport_id,
                MediaKind::Audio,
                rtp(MediaKind::Audio),
                ParticipantId::from("examinee-1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaServerError::InvalidState(_)));

        let err = session
            .produce(
                TransportId::new(),
                MediaKind::Audio,
                rtp(MediaKind::Audio),
                ParticipantId::from("examinee-1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaServerError::TransportNotFound(_)));
    }

    #[tokio::test]
    async fn test_second_produce_supersedes_first() {
        let pool = pool();
        let directory = Arc::new(ProducerDirectory::new());
        let mut session = ConnectionSession::create("conn", &pool, Arc::clone(&directory))
            .await
            .unwrap();
        let transport_id = connected(&mut session).await;
        let participant = ParticipantId::from("examinee-1");

        let first = session
            .produce(transport_id, MediaKind::Video, rtp(MediaKind::Video), participant.clone())
            .await
            .unwrap();
        let audio = session
            .produce(transport_id, MediaKind::Audio, rtp(MediaKind::Audio), participant.clone())
            .await
            .unwrap();
        let second = session
            .produce(transport_id, MediaKind::Video, rtp(MediaKind::Video), participant)
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(session.snapshot().producers, 2);
        let live: Vec<_> = directory
            .live_producers()
            .await
            .iter()
            .map(Producer::id)
            .collect();
        assert_eq!(live, vec![audio, second]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_noop() {
        let pool = pool();
        let mut session =
            ConnectionSession::create("conn", &pool, Arc::new(ProducerDirectory::new()))
                .await
                .unwrap();
        let transport_id = connected(&mut session).await;

        let producer = Producer::new(
            ParticipantId::from("examinee-1"),
            MediaKind::Audio,
            rtp(MediaKind::Audio),
            transport_id,
            session.router().id(),
        );
        assert!(session.register_producer(producer.clone()).await);
        assert!(!session.register_producer(producer).await);
        assert_eq!(session.snapshot().producers, 1);
    }

    #[tokio::test]
    async fn test_consume_and_resume() {
        let pool = pool();
        let directory = Arc::new(ProducerDirectory::new());
        let mut examinee = ConnectionSession::create("examinee", &pool, Arc::clone(&directory))
            .await
            .unwrap();
        let mut proctor = ConnectionSession::create("proctor", &pool, Arc::clone(&directory))
            .await
            .unwrap();

        let send = connected(&mut examinee).await;
        examinee
            .produce(
                send,
                MediaKind::Audio,
                rtp(MediaKind::Audio),
                ParticipantId::from("examinee-1"),
            )
            .await
            .unwrap();

        let recv = connected(&mut proctor).await;
        let caps = proctor.router_capabilities().unwrap();
        let consumers = proctor
            .consume(recv, &[ParticipantId::from("examinee-1")], &caps)
            .await
            .unwrap();
        assert_eq!(consumers.len(), 1);
        let consumer = consumers.first().unwrap();
        assert!(consumer.paused);

        proctor.resume_consumer(consumer.consumer_id).unwrap();
        assert!(matches!(
            proctor.resume_consumer(ConsumerId::new()),
            Err(MediaServerError::ConsumerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_examinee_teardown_closes_proctor_consumers() {
        let pool = pool();
        let directory = Arc::new(ProducerDirectory::new());
        let mut proctor = ConnectionSession::create("proctor", &pool, Arc::clone(&directory))
            .await
            .unwrap();
        let recv = connected(&mut proctor).await;
        let caps = proctor.router_capabilities().unwrap();
        let examinee_id = ParticipantId::from("examinee-1");

        let mut stale = Vec::new();
        for round in 0..3 {
            let mut examinee =
                ConnectionSession::create(format!("examinee-{round}"), &pool, Arc::clone(&directory))
                    .await
                    .unwrap();
            let send = connected(&mut examinee).await;
            examinee
                .produce(send, MediaKind::Audio, rtp(MediaKind::Audio), examinee_id.clone())
                .await
                .unwrap();

            let consumers = proctor
                .consume(recv, std::slice::from_ref(&examinee_id), &caps)
                .await
                .unwrap();
            assert_eq!(consumers.len(), 1);
            assert_eq!(proctor.snapshot().consumers, 1);
            stale.extend(consumers.into_iter().map(|c| c.consumer_id));

            examinee.teardown().await;
            assert_eq!(proctor.snapshot().consumers, 0);
        }

        for consumer_id in stale {
            assert!(matches!(
                proctor.resume_consumer(consumer_id),
                Err(MediaServerError::ConsumerNotFound(_))
            ));
        }
        assert_eq!(proctor.snapshot().consumers, 0);
    }

    #[tokio::test]
    async fn test_consume_empty_targets_is_not_found() {
        let pool = pool();
        let mut session =
            ConnectionSession::create("conn", &pool, Arc::new(ProducerDirectory::new()))
                .await
                .unwrap();
        let recv = connected(&mut session).await;
        let caps = session.router_capabilities().unwrap();

        let err = session.consume(recv, &[], &caps).await.unwrap_err();
        assert!(matches!(err, MediaServerError::EmptyTargetList));
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let pool = pool();
        let directory = Arc::new(ProducerDirectory::new());
        let mut session = ConnectionSession::create("conn", &pool, Arc::clone(&directory))
            .await
            .unwrap();

        let send = connected(&mut session).await;
        let _recv = connected(&mut session).await;
        let participant = ParticipantId::from("examinee-1");
        for kind in [MediaKind::Audio, MediaKind::Video] {
            session
                .produce(send, kind, rtp(kind), participant.clone())
                .await
                .unwrap();
        }
        session
            .produce(send, MediaKind::Audio, rtp(MediaKind::Audio), ParticipantId::from("screen"))
            .await
            .unwrap();
        assert_eq!(
            session.snapshot(),
            SessionSnapshot {
                transports: 2,
                producers: 3,
                consumers: 0
            }
        );

        session.teardown().await;
        session.teardown().await;

        assert_eq!(session.snapshot(), SessionSnapshot::default());
        assert!(directory.is_empty().await);
        assert!(matches!(
            session.connect_transport(send, dtls()),
            Err(MediaServerError::SessionNotFound)
        ));
        assert_eq!(
            session.create_transport().unwrap_err().error_code(),
            signaling_protocol::ErrorCode::NotFound
        );
    }

    #[tokio::test]
    async fn test_dtls_closed_removes_transport_and_producers() {
        let pool = pool();
        let directory = Arc::new(ProducerDirectory::new());
        let mut session = ConnectionSession::create("conn", &pool, Arc::clone(&directory))
            .await
            .unwrap();
        let send = connected(&mut session).await;
        session
            .produce(
                send,
                MediaKind::Audio,
                rtp(MediaKind::Audio),
                ParticipantId::from("examinee-1"),
            )
            .await
            .unwrap();

        assert!(session.handle_dtls_closed(send).await);
        assert!(!session.handle_dtls_closed(send).await);
        assert_eq!(session.snapshot(), SessionSnapshot::default());
        assert!(directory.is_empty().await);
        assert!(matches!(
            session.connect_transport(send, dtls()),
            Err(MediaServerError::TransportNotFound(_))
        ));
    }
}
