//! Transport - network endpoint for sending or receiving media.
//!
//! State machine: `Created -> Connecting -> Connected -> Closed`.
//! Producing and consuming require at least `Connecting`; `Closed` is
//! terminal and closes every consumer on the transport.

use super::consumer::Consumer;
use super::producer::Producer;
use super::router::Router;
use crate::errors::MediaServerError;
use common::types::{ConsumerId, ProducerId, TransportId};
use signaling_protocol::rtp::{
    DtlsParameters, DtlsRole, IceCandidate, IceParameters, RtpCapabilities,
};
use signaling_protocol::TransportInfo;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportState {
    Created,
    Connecting,
    Connected,
    Closed,
}

impl TransportState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportState::Created => "created",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Closed => "closed",
        }
    }
}

#[derive(Debug)]
pub struct Transport {
    id: TransportId,
    state: TransportState,
    ice_parameters: IceParameters,
    ice_candidates: Vec<IceCandidate>,
    local_dtls: DtlsParameters,
    remote_dtls: Option<DtlsParameters>,
    producer_ids: Vec<ProducerId>,
    consumers: HashMap<ConsumerId, Consumer>,
}

impl Transport {
    #[must_use]
    pub fn new(
        id: TransportId,
        ice_parameters: IceParameters,
        ice_candidates: Vec<IceCandidate>,
        local_dtls: DtlsParameters,
    ) -> Self {
        Self {
            id,
            state: TransportState::Created,
            ice_parameters,
            ice_candidates,
            local_dtls,
            remote_dtls: None,
            producer_ids: Vec::new(),
            consumers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> TransportId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == TransportState::Closed
    }

    /// Negotiated local DTLS role, `Auto` until connected.
    #[must_use]
    pub fn dtls_role(&self) -> DtlsRole {
        self.local_dtls.role
    }

    #[must_use]
    pub fn info(&self) -> TransportInfo {
        TransportInfo {
            transport_id: self.id,
            ice_parameters: self.ice_parameters.clone(),
            ice_candidates: self.ice_candidates.clone(),
            dtls_parameters: self.local_dtls.clone(),
        }
    }

    /// Apply the remote DTLS parameters and complete the handshake.
    ///
    /// # Errors
    ///
    /// - [`MediaServerError::InvalidState`] if already connected or closed
    /// - [`MediaServerError::Negotiation`] if the remote parameters are invalid
    pub fn connect(&mut self, remote: DtlsParameters) -> Result<(), MediaServerError> {
        match self.state {
            TransportState::Created | TransportState::Connecting => {}
            TransportState::Connected => {
                return Err(MediaServerError::InvalidState(
                    "transport already connected".to_string(),
                ));
            }
            TransportState::Closed => {
                return Err(MediaServerError::InvalidState(
                    "transport is closed".to_string(),
                ));
            }
        }

        remote
            .validate()
            .map_err(|e| MediaServerError::Negotiation(e.to_string()))?;

        self.local_dtls.role = match remote.role {
            DtlsRole::Client | DtlsRole::Auto => DtlsRole::Server,
            DtlsRole::Server => DtlsRole::Client,
        };
        self.remote_dtls = Some(remote);
        self.state = TransportState::Connecting;

        debug!(
            target: "media.engine.transport",
            transport_id = %self.id,
            role = ?self.local_dtls.role,
            "DTLS handshake started"
        );

        self.state = TransportState::Connected;
        Ok(())
    }

    /// Check the transport can carry producers or consumers.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::InvalidState`] before `connect` and after close.
    pub fn ensure_media_ready(&self) -> Result<(), MediaServerError> {
        match self.state {
            TransportState::Connecting | TransportState::Connected => Ok(()),
            TransportState::Created => Err(MediaServerError::InvalidState(
                "transport not connected".to_string(),
            )),
            TransportState::Closed => Err(MediaServerError::InvalidState(
                "transport is closed".to_string(),
            )),
        }
    }

    /// Record a producer published on this transport.
    pub fn attach_producer(&mut self, producer_id: ProducerId) {
        if !self.producer_ids.contains(&producer_id) {
            self.producer_ids.push(producer_id);
        }
    }

    pub fn detach_producer(&mut self, producer_id: ProducerId) -> bool {
        let before = self.producer_ids.len();
        self.producer_ids.retain(|id| *id != producer_id);
        self.producer_ids.len() != before
    }

    #[must_use]
    pub fn producer_ids(&self) -> &[ProducerId] {
        &self.producer_ids
    }

    /// Create a paused consumer of `producer` on this transport.
    ///
    /// # Errors
    ///
    /// - [`MediaServerError::InvalidState`] if the transport is not ready
    /// - [`MediaServerError::Negotiation`] if `caps` cannot receive the producer
    pub fn create_consumer(
        &mut self,
        router: &Router,
        producer: &Producer,
        caps: &RtpCapabilities,
    ) -> Result<Consumer, MediaServerError> {
        self.ensure_media_ready()?;

        if producer.is_closed() {
            return Err(MediaServerError::ProducerNotFound(producer.id()));
        }

        let rtp_parameters = router
            .consumer_rtp_parameters(producer.rtp_parameters(), caps)
            .ok_or_else(|| {
                MediaServerError::Negotiation(format!(
                    "cannot consume producer {}",
                    producer.id()
                ))
            })?;

        self.prune_closed_consumers();
        let consumer = Consumer::new(producer.clone(), self.id, rtp_parameters);
        self.consumers.insert(consumer.id(), consumer.clone());
        Ok(consumer)
    }

    /// A live consumer on this transport.
    #[must_use]
    pub fn consumer(&self, consumer_id: ConsumerId) -> Option<&Consumer> {
        self.consumers
            .get(&consumer_id)
            .filter(|consumer| !consumer.is_closed())
    }

    /// Live consumers on this transport.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.values().filter(|c| !c.is_closed()).count()
    }

    /// Forget consumers whose producer has closed. Returns how many were removed.
    pub fn prune_closed_consumers(&mut self) -> usize {
        let before = self.consumers.len();
        self.consumers.retain(|_, consumer| !consumer.is_closed());
        let pruned = before - self.consumers.len();
        if pruned > 0 {
            debug!(
                target: "media.engine.transport",
                transport_id = %self.id,
                pruned,
                "Closed consumers removed"
            );
        }
        pruned
    }

    /// Close every consumer and the transport itself.
    ///
    /// Returns the ids of the producers published on it so the owning
    /// session can close them. Closing twice returns nothing.
    pub fn close(&mut self) -> Vec<ProducerId> {
        if self.state == TransportState::Closed {
            return Vec::new();
        }

        for consumer in self.consumers.values() {
            consumer.close();
        }
        self.consumers.clear();
        self.state = TransportState::Closed;

        debug!(
            target: "media.engine.transport",
            transport_id = %self.id,
            producers = self.producer_ids.len(),
            "Transport closed"
        );

        std::mem::take(&mut self.producer_ids)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ListenConfig;
    use crate::engine::default_media_codecs;
    use common::types::{ParticipantId, WorkerId};
    use signaling_protocol::rtp::{
        format_fingerprint, DtlsFingerprint, RtpCodecCapability, RtpCodecParameters,
        RtpParameters,
    };
    use signaling_protocol::MediaKind;

    fn router() -> Router {
        Router::new(WorkerId(0), &default_media_codecs(), ListenConfig::default()).unwrap()
    }

    fn remote_dtls() -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: format_fingerprint(&[0x11; 32]),
            }],
        }
    }

    fn opus_producer(router: &Router) -> Producer {
        Producer::new(
            ParticipantId::from("examinee-1"),
            MediaKind::Audio,
            RtpParameters {
                codecs: vec![RtpCodecParameters::from_capability(
                    &RtpCodecCapability::audio("audio/opus", 48000, 2),
                    111,
                )],
                ..RtpParameters::default()
            },
            TransportId::new(),
            router.id(),
        )
    }

    #[test]
    fn test_connect_transitions_to_connected() {
        let router = router();
        let mut transport = router.create_transport();
        assert_eq!(transport.state(), TransportState::Created);
        assert!(transport.ensure_media_ready().is_err());

        transport.connect(remote_dtls()).unwrap();
        assert_eq!(transport.state(), TransportState::Connected);
        assert_eq!(transport.dtls_role(), DtlsRole::Server);
        assert!(transport.ensure_media_ready().is_ok());
    }

    #[test]
    fn test_second_connect_is_invalid_state() {
        let router = router();
        let mut transport = router.create_transport();
        transport.connect(remote_dtls()).unwrap();

        let err = transport.connect(remote_dtls()).unwrap_err();
        assert!(matches!(err, MediaServerError::InvalidState(_)));
    }

    #[test]
    fn test_invalid_dtls_keeps_state() {
        let router = router();
        let mut transport = router.create_transport();
        let err = transport
            .connect(DtlsParameters {
                role: DtlsRole::Client,
                fingerprints: vec![],
            })
            .unwrap_err();

        assert!(matches!(err, MediaServerError::Negotiation(_)));
        assert_eq!(transport.state(), TransportState::Created);
    }

    #[test]
    fn test_close_cascades_to_consumers() {
        let router = router();
        let mut transport = router.create_transport();
        transport.connect(remote_dtls()).unwrap();

        let producer = opus_producer(&router);
        let consumer = transport
            .create_consumer(&router, &producer, router.rtp_capabilities())
            .unwrap();
        transport.attach_producer(producer.id());

        let producers = transport.close();
        assert_eq!(producers, vec![producer.id()]);
        assert!(consumer.is_closed());
        assert_eq!(transport.consumer_count(), 0);
        assert!(transport.close().is_empty());
        assert!(matches!(
            transport.connect(remote_dtls()),
            Err(MediaServerError::InvalidState(_))
        ));
    }

    #[test]
    fn test_producer_close_drops_its_consumers() {
        let router = router();
        let mut transport = router.create_transport();
        transport.connect(remote_dtls()).unwrap();

        let stale = opus_producer(&router);
        let stale_consumer = transport
            .create_consumer(&router, &stale, router.rtp_capabilities())
            .unwrap();
        assert_eq!(transport.consumer_count(), 1);

        stale.close();
        assert!(transport.consumer(stale_consumer.id()).is_none());
        assert_eq!(transport.consumer_count(), 0);

        // The next consume clears the dead entry from the map
        let fresh = opus_producer(&router);
        let fresh_consumer = transport
            .create_consumer(&router, &fresh, router.rtp_capabilities())
            .unwrap();
        assert_eq!(transport.consumers.len(), 1);
        assert!(transport.consumer(fresh_consumer.id()).is_some());
        assert_eq!(transport.prune_closed_consumers(), 0);
    }

    #[test]
    fn test_consumer_on_unconnected_transport_rejected() {
        let router = router();
        let mut transport = router.create_transport();
        let producer = opus_producer(&router);
        let err = transport
            .create_consumer(&router, &producer, router.rtp_capabilities())
            .unwrap_err();
        assert!(matches!(err, MediaServerError::InvalidState(_)));
    }
}
