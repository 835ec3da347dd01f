//! Consumer - relay of one producer onto a receive transport.
//!
//! Consumers start paused and forward media only after an explicit resume.
//! Closing the producer closes every consumer of it.

use super::producer::Producer;
use common::types::{ConsumerId, TransportId};
use signaling_protocol::rtp::RtpParameters;
use signaling_protocol::ConsumerInfo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

#[derive(Debug)]
struct ConsumerInner {
    id: ConsumerId,
    producer: Producer,
    transport_id: TransportId,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl Consumer {
    /// Create a paused consumer of `producer`.
    #[must_use]
    pub fn new(producer: Producer, transport_id: TransportId, rtp_parameters: RtpParameters) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                id: ConsumerId::new(),
                producer,
                transport_id,
                rtp_parameters,
                paused: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.inner.id
    }

    #[must_use]
    pub fn producer(&self) -> &Producer {
        &self.inner.producer
    }

    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner.transport_id
    }

    #[must_use]
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Start forwarding. Returns `false` if the consumer was not paused.
    pub fn resume(&self) -> bool {
        self.inner.paused.swap(false, Ordering::SeqCst)
    }

    /// Close the consumer. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::SeqCst)
    }

    /// Closed directly or through its producer.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.producer.is_closed()
    }

    /// Whether media would currently flow through this consumer.
    #[must_use]
    pub fn forwards_media(&self) -> bool {
        !self.is_closed() && !self.is_paused()
    }

    /// Descriptor returned to the client.
    #[must_use]
    pub fn info(&self) -> ConsumerInfo {
        let producer = &self.inner.producer;
        ConsumerInfo {
            consumer_id: self.inner.id,
            producer_id: producer.id(),
            participant_id: producer.participant_id().clone(),
            kind: producer.kind(),
            rtp_parameters: self.inner.rtp_parameters.clone(),
            paused: self.is_paused(),
        }
    }
}
