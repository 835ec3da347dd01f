//! Client-side records of server media resources.

use common::types::{ConsumerId, ParticipantId, ProducerId, TransportId};
use signaling_protocol::rtp::MediaKind;
use signaling_protocol::{ConsumerInfo, TransportInfo};

/// Direction of a local transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDirection {
    Send,
    Recv,
}

/// A server transport this client created and connected.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    info: TransportInfo,
    direction: TransportDirection,
}

impl LocalTransport {
    #[must_use]
    pub fn new(info: TransportInfo, direction: TransportDirection) -> Self {
        Self { info, direction }
    }

    #[must_use]
    pub fn id(&self) -> TransportId {
        self.info.transport_id
    }

    #[must_use]
    pub fn direction(&self) -> TransportDirection {
        self.direction
    }

    #[must_use]
    pub fn info(&self) -> &TransportInfo {
        &self.info
    }
}

/// A local track being published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProducer {
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub track_id: String,
}

/// One inbound track relayed from another participant.
#[derive(Debug, Clone)]
pub struct RemoteConsumer {
    info: ConsumerInfo,
    resumed: bool,
}

impl RemoteConsumer {
    #[must_use]
    pub fn new(info: ConsumerInfo) -> Self {
        let resumed = !info.paused;
        Self { info, resumed }
    }

    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.info.consumer_id
    }

    #[must_use]
    pub fn producer_id(&self) -> ProducerId {
        self.info.producer_id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.info.kind
    }

    #[must_use]
    pub fn info(&self) -> &ConsumerInfo {
        &self.info
    }

    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub(crate) fn mark_resumed(&mut self) {
        self.resumed = true;
    }
}

/// Everything received from one participant, keyed by their id.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    participant_id: ParticipantId,
    consumers: Vec<RemoteConsumer>,
}

impl RemoteStream {
    #[must_use]
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            consumers: Vec::new(),
        }
    }

    #[must_use]
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    #[must_use]
    pub fn consumers(&self) -> &[RemoteConsumer] {
        &self.consumers
    }

    /// The consumer for `kind`, if one was created.
    #[must_use]
    pub fn track(&self, kind: MediaKind) -> Option<&RemoteConsumer> {
        self.consumers.iter().find(|c| c.kind() == kind)
    }

    /// Add a consumer; a newer consumer of the same kind replaces the old one.
    pub fn add_consumer(&mut self, consumer: RemoteConsumer) {
        self.consumers.retain(|c| c.kind() != consumer.kind());
        self.consumers.push(consumer);
    }

    pub(crate) fn consumer_mut(&mut self, consumer_id: ConsumerId) -> Option<&mut RemoteConsumer> {
        self.consumers.iter_mut().find(|c| c.id() == consumer_id)
    }

    /// Drop a consumer the server no longer knows.
    pub(crate) fn remove_consumer(&mut self, consumer_id: ConsumerId) -> bool {
        let before = self.consumers.len();
        self.consumers.retain(|c| c.id() != consumer_id);
        self.consumers.len() != before
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}
