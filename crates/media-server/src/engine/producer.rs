//! Producer - an outbound stream published on a send transport.

use common::types::{ParticipantId, ProducerId, RouterId, TransportId};
use signaling_protocol::rtp::{MediaKind, RtpParameters};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared handle to a producer.
///
/// The owning session creates and closes it; the producer directory and
/// consumers in other sessions hold clones to observe liveness.
#[derive(Debug, Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

#[derive(Debug)]
struct ProducerInner {
    id: ProducerId,
    participant_id: ParticipantId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    transport_id: TransportId,
    router_id: RouterId,
    closed: AtomicBool,
}

impl Producer {
    #[must_use]
    pub fn new(
        participant_id: ParticipantId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        transport_id: TransportId,
        router_id: RouterId,
    ) -> Self {
        Self {
            inner: Arc::new(ProducerInner {
                id: ProducerId::new(),
                participant_id,
                kind,
                rtp_parameters,
                transport_id,
                router_id,
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ProducerId {
        self.inner.id
    }

    #[must_use]
    pub fn participant_id(&self) -> &ParticipantId {
        &self.inner.participant_id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    #[must_use]
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner.transport_id
    }

    #[must_use]
    pub fn router_id(&self) -> RouterId {
        self.inner.router_id
    }

    /// Close the producer. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_close_is_idempotent_and_shared() {
        let producer = Producer::new(
            ParticipantId::from("examinee-1"),
            MediaKind::Audio,
            RtpParameters::default(),
            TransportId::new(),
            RouterId::new(),
        );
        let observer = producer.clone();

        assert!(!observer.is_closed());
        assert!(producer.close());
        assert!(!producer.close());
        assert!(observer.is_closed());
        assert_eq!(observer.id(), producer.id());
    }
}
