//! Process-wide index of live producers in registration order.
//!
//! Only the owning session registers and unregisters a producer. Resolvers
//! read a snapshot; closed producers are skipped.

use super::producer::Producer;
use common::types::ProducerId;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct ProducerDirectory {
    producers: RwLock<Vec<Producer>>,
}

impl ProducerDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a producer. Returns `false` if the id is already present.
    ///
    /// Closed entries left behind by dropped sessions are pruned here.
    pub async fn register(&self, producer: Producer) -> bool {
        let mut producers = self.producers.write().await;
        producers.retain(|p| !p.is_closed());
        if producers.iter().any(|p| p.id() == producer.id()) {
            return false;
        }
        producers.push(producer);
        true
    }

    /// Remove a producer. Returns `false` if it was not registered.
    pub async fn unregister(&self, producer_id: ProducerId) -> bool {
        let mut producers = self.producers.write().await;
        let before = producers.len();
        producers.retain(|p| p.id() != producer_id);
        producers.len() != before
    }

    /// Live producers in registration order.
    pub async fn live_producers(&self) -> Vec<Producer> {
        self.producers
            .read()
            .await
            .iter()
            .filter(|p| !p.is_closed())
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.producers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.producers.read().await.is_empty()
    }
}
