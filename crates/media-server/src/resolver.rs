//! Subscription resolver - turns "consume these participants" into consumers.
//!
//! Walks live producers in registration order, keeps the ones whose
//! participant was requested, and creates a paused consumer for each one the
//! caller can receive. Missing or incompatible targets are skipped silently;
//! a failure on one consumer does not abort the others.

use crate::engine::{Producer, ProducerDirectory, Router, Transport};
use crate::errors::MediaServerError;
use common::types::ParticipantId;
use signaling_protocol::rtp::{MediaKind, RtpCapabilities};
use signaling_protocol::ConsumerInfo;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Pick the producers to consume, in registration order.
///
/// When a participant has several live producers of the same kind (e.g. a
/// reconnect whose old connection is not reaped yet) only the most recently
/// registered one is kept.
#[must_use]
pub fn select_producers(live: &[Producer], participant_ids: &[ParticipantId]) -> Vec<Producer> {
    let requested: HashSet<&ParticipantId> = participant_ids.iter().collect();

    let mut latest: HashMap<(&ParticipantId, MediaKind), usize> = HashMap::new();
    for (index, producer) in live.iter().enumerate() {
        if requested.contains(producer.participant_id()) {
            latest.insert((producer.participant_id(), producer.kind()), index);
        }
    }

    live.iter()
        .enumerate()
        .filter(|(index, producer)| {
            latest.get(&(producer.participant_id(), producer.kind())) == Some(index)
        })
        .map(|(_, producer)| producer.clone())
        .collect()
}

/// Create consumers on `transport` for every live, compatible producer of
/// the requested participants.
///
/// # Errors
///
/// Returns [`MediaServerError::EmptyTargetList`] when `participant_ids` is
/// empty. Per-producer failures are logged and skipped.
pub async fn resolve_consumers(
    directory: &ProducerDirectory,
    router: &Router,
    transport: &mut Transport,
    participant_ids: &[ParticipantId],
    caps: &RtpCapabilities,
) -> Result<Vec<ConsumerInfo>, MediaServerError> {
    if participant_ids.is_empty() {
        return Err(MediaServerError::EmptyTargetList);
    }

    let live = directory.live_producers().await;
    let selected = select_producers(&live, participant_ids);

    let mut consumers = Vec::with_capacity(selected.len());
    for producer in &selected {
        if !router.can_consume(producer.rtp_parameters(), caps) {
            debug!(
                target: "media.resolver",
                producer_id = %producer.id(),
                participant_id = %producer.participant_id(),
                kind = %producer.kind(),
                "Caller cannot consume producer, skipping"
            );
            continue;
        }

        match transport.create_consumer(router, producer, caps) {
            Ok(consumer) => consumers.push(consumer.info()),
            Err(e) => {
                warn!(
                    target: "media.resolver",
                    producer_id = %producer.id(),
                    participant_id = %producer.participant_id(),
                    error = %e,
                    "Failed to create consumer, skipping"
                );
            }
        }
    }

    debug!(
        target: "media.resolver",
        transport_id = %transport.id(),
        requested = participant_ids.len(),
        candidates = selected.len(),
        created = consumers.len(),
        "Subscription resolved"
    );

    Ok(consumers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ListenConfig;
    use crate::engine::default_media_codecs;
    use common::types::{RouterId, TransportId, WorkerId};
    use signaling_protocol::rtp::{
        format_fingerprint, DtlsFingerprint, DtlsParameters, DtlsRole, RtpCodecCapability,
        RtpCodecParameters, RtpParameters,
    };

    fn router() -> Router {
        Router::new(WorkerId(0), &default_media_codecs(), ListenConfig::default()).unwrap()
    }

    fn producer(participant: &str, kind: MediaKind) -> Producer {
        let capability = match kind {
            MediaKind::Audio => RtpCodecCapability::audio("audio/opus", 48000, 2),
            MediaKind::Video => RtpCodecCapability::video("video/VP8", 90000),
        };
        Producer::new(
            ParticipantId::from(participant),
            kind,
            RtpParameters {
                codecs: vec![RtpCodecParameters::from_capability(&capability, 100)],
                ..RtpParameters::default()
            },
            TransportId::new(),
            RouterId::new(),
        )
    }

    fn connected_transport(router: &Router) -> Transport {
        let mut transport = router.create_transport();
        transport
            .connect(DtlsParameters {
                role: DtlsRole::Client,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: format_fingerprint(&[0x42; 32]),
                }],
            })
            .unwrap();
        transport
    }

    fn ids(participants: &[&str]) -> Vec<ParticipantId> {
        participants.iter().map(|p| ParticipantId::from(*p)).collect()
    }

    #[test]
    fn test_selection_follows_registration_order() {
        let c = producer("C", MediaKind::Audio);
        let a = producer("A", MediaKind::Audio);
        let x = producer("X", MediaKind::Audio);
        let live = vec![c.clone(), a.clone(), x];

        let selected = select_producers(&live, &ids(&["A", "B", "C"]));
        let selected: Vec<_> = selected.iter().map(Producer::id).collect();
        assert_eq!(selected, vec![c.id(), a.id()]);
    }

    #[test]
    fn test_selection_keeps_latest_per_kind() {
        let old_audio = producer("A", MediaKind::Audio);
        let video = producer("A", MediaKind::Video);
        let new_audio = producer("A", MediaKind::Audio);
        let live = vec![old_audio, video.clone(), new_audio.clone()];

        let selected: Vec<_> = select_producers(&live, &ids(&["A"]))
            .iter()
            .map(Producer::id)
            .collect();
        assert_eq!(selected, vec![video.id(), new_audio.id()]);
    }

    #[tokio::test]
    async fn test_missing_targets_are_omitted() {
        let router = router();
        let directory = ProducerDirectory::new();
        directory.register(producer("A", MediaKind::Audio)).await;
        directory.register(producer("C", MediaKind::Audio)).await;

        let mut transport = connected_transport(&router);
        let consumers = resolve_consumers(
            &directory,
            &router,
            &mut transport,
            &ids(&["A", "B", "C"]),
            router.rtp_capabilities(),
        )
        .await
        .unwrap();

        let participants: Vec<_> = consumers
            .iter()
            .map(|c| c.participant_id.as_str())
            .collect();
        assert_eq!(participants, vec!["A", "C"]);
        assert!(consumers.iter().all(|c| c.paused));
        assert_eq!(transport.consumer_count(), 2);
    }

    #[tokio::test]
    async fn test_incompatible_producers_are_skipped() {
        let router = router();
        let directory = ProducerDirectory::new();
        directory.register(producer("A", MediaKind::Audio)).await;
        directory.register(producer("A", MediaKind::Video)).await;

        let audio_only = RtpCapabilities {
            codecs: vec![RtpCodecCapability::audio("audio/opus", 48000, 2)],
        };
        let mut transport = connected_transport(&router);
        let consumers = resolve_consumers(
            &directory,
            &router,
            &mut transport,
            &ids(&["A"]),
            &audio_only,
        )
        .await
        .unwrap();

        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers.first().unwrap().kind, MediaKind::Audio);
    }

    #[tokio::test]
    async fn test_empty_target_list_is_not_found() {
        let router = router();
        let directory = ProducerDirectory::new();
        let mut transport = connected_transport(&router);

        let err = resolve_consumers(
            &directory,
            &router,
            &mut transport,
            &[],
            router.rtp_capabilities(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaServerError::EmptyTargetList));
    }

    #[tokio::test]
    async fn test_unconnected_transport_yields_no_consumers() {
        let router = router();
        let directory = ProducerDirectory::new();
        directory.register(producer("A", MediaKind::Audio)).await;

        let mut transport = router.create_transport();
        let consumers = resolve_consumers(
            &directory,
            &router,
            &mut transport,
            &ids(&["A"]),
            router.rtp_capabilities(),
        )
        .await
        .unwrap();
        assert!(consumers.is_empty());
    }
}
