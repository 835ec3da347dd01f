//! Router - routing context hosted by one worker.
//!
//! A router is shared read-mostly by every session assigned to its worker.
//! It advertises RTP capabilities, mints transports and decides whether a
//! caller can consume a producer.

use super::transport::Transport;
use crate::config::ListenConfig;
use crate::errors::MediaServerError;
use common::types::{RouterId, TransportId, WorkerId};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use ring::digest;
use signaling_protocol::rtp::{
    format_fingerprint, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    MediaKind, RtpCapabilities, RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters,
    RtpParameters, TransportProtocol,
};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// First dynamic payload type handed out to router codecs.
const FIRST_PAYLOAD_TYPE: u8 = 100;

const ICE_UFRAG_LEN: usize = 16;
const ICE_PASSWORD_BYTES: usize = 16;

/// ICE priorities for host candidates (UDP preferred over TCP).
const UDP_CANDIDATE_PRIORITY: u32 = 1_076_302_079;
const TCP_CANDIDATE_PRIORITY: u32 = 1_076_276_479;

#[derive(Debug)]
pub struct Router {
    id: RouterId,
    worker_id: WorkerId,
    capabilities: RtpCapabilities,
    listen: ListenConfig,
    next_port: AtomicU32,
    fingerprint: DtlsFingerprint,
}

impl Router {
    /// Build a router from the shared codec list.
    ///
    /// Payload types are assigned from 100 upward in list order.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::PoolInit`] when the codec list is empty,
    /// a codec's MIME type does not match its kind, or the port range is
    /// inverted.
    pub fn new(
        worker_id: WorkerId,
        media_codecs: &[RtpCodecCapability],
        listen: ListenConfig,
    ) -> Result<Self, MediaServerError> {
        if media_codecs.is_empty() {
            return Err(MediaServerError::PoolInit(
                "router requires at least one media codec".to_string(),
            ));
        }
        if listen.rtc_min_port > listen.rtc_max_port {
            return Err(MediaServerError::PoolInit(format!(
                "invalid RTC port range {}-{}",
                listen.rtc_min_port, listen.rtc_max_port
            )));
        }

        let mut codecs = Vec::with_capacity(media_codecs.len());
        for (index, codec) in media_codecs.iter().enumerate() {
            if MediaKind::from_mime_type(&codec.mime_type) != Some(codec.kind) {
                return Err(MediaServerError::PoolInit(format!(
                    "codec {} does not match kind {}",
                    codec.mime_type, codec.kind
                )));
            }

            let payload_type = u8::try_from(index)
                .ok()
                .and_then(|offset| FIRST_PAYLOAD_TYPE.checked_add(offset))
                .filter(|pt| *pt <= 127)
                .ok_or_else(|| {
                    MediaServerError::PoolInit("too many media codecs".to_string())
                })?;

            let mut codec = codec.clone();
            codec.preferred_payload_type = Some(payload_type);
            codecs.push(codec);
        }

        let router = Self {
            id: RouterId::new(),
            worker_id,
            capabilities: RtpCapabilities { codecs },
            listen,
            next_port: AtomicU32::new(0),
            fingerprint: certificate_fingerprint(),
        };

        debug!(
            target: "media.engine.router",
            router_id = %router.id,
            worker_id = %worker_id,
            codecs = router.capabilities.codecs.len(),
            "Router created"
        );

        Ok(router)
    }

    #[must_use]
    pub fn id(&self) -> RouterId {
        self.id
    }

    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    #[must_use]
    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.capabilities
    }

    /// Create a new transport with fresh ICE credentials.
    #[must_use]
    pub fn create_transport(&self) -> Transport {
        let mut rng = rand::thread_rng();

        let username_fragment: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(ICE_UFRAG_LEN)
            .map(char::from)
            .collect();
        let mut password = [0u8; ICE_PASSWORD_BYTES];
        rng.fill_bytes(&mut password);

        let ice_parameters = IceParameters {
            username_fragment,
            password: hex::encode(password),
            ice_lite: true,
        };

        let port = self.allocate_port();
        let ip = self.listen.announced_ip.to_string();
        let ice_candidates = vec![
            IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: UDP_CANDIDATE_PRIORITY,
                ip: ip.clone(),
                port,
                protocol: TransportProtocol::Udp,
                candidate_type: "host".to_string(),
            },
            IceCandidate {
                foundation: "tcpcandidate".to_string(),
                priority: TCP_CANDIDATE_PRIORITY,
                ip,
                port,
                protocol: TransportProtocol::Tcp,
                candidate_type: "host".to_string(),
            },
        ];

        let dtls_parameters = DtlsParameters {
            role: DtlsRole::Auto,
            fingerprints: vec![self.fingerprint.clone()],
        };

        Transport::new(
            TransportId::new(),
            ice_parameters,
            ice_candidates,
            dtls_parameters,
        )
    }

    /// Check that a producer's RTP parameters can be routed here.
    ///
    /// # Errors
    ///
    /// Returns [`MediaServerError::Negotiation`] when no codec is given, the
    /// codec's kind differs from `kind`, or the router does not support it.
    pub fn validate_produce(
        &self,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<(), MediaServerError> {
        let codec = rtp_parameters
            .media_codec()
            .ok_or_else(|| MediaServerError::Negotiation("no codec in RTP parameters".to_string()))?;

        if codec.kind() != Some(kind) {
            return Err(MediaServerError::Negotiation(format!(
                "codec {} does not match kind {kind}",
                codec.mime_type
            )));
        }

        if self.capabilities.find_matching(codec).is_none() {
            return Err(MediaServerError::Negotiation(format!(
                "unsupported codec {}",
                codec.mime_type
            )));
        }

        Ok(())
    }

    /// Whether a caller with `caps` can receive a producer with `producer_parameters`.
    ///
    /// The producer's media codec must be supported by both this router and
    /// the caller.
    #[must_use]
    pub fn can_consume(&self, producer_parameters: &RtpParameters, caps: &RtpCapabilities) -> bool {
        producer_parameters.media_codec().is_some_and(|codec| {
            self.capabilities.find_matching(codec).is_some() && caps.find_matching(codec).is_some()
        })
    }

    /// RTP parameters for a consumer, using the caller's payload type.
    #[must_use]
    pub fn consumer_rtp_parameters(
        &self,
        producer_parameters: &RtpParameters,
        caps: &RtpCapabilities,
    ) -> Option<RtpParameters> {
        if !self.can_consume(producer_parameters, caps) {
            return None;
        }
        let codec = producer_parameters.media_codec()?;
        let capability = caps.find_matching(codec)?;
        let payload_type = capability
            .preferred_payload_type
            .unwrap_or(codec.payload_type);

        Some(RtpParameters {
            mid: None,
            codecs: vec![RtpCodecParameters {
                payload_type,
                ..codec.clone()
            }],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(rand::thread_rng().gen()),
            }],
        })
    }

    fn allocate_port(&self) -> u16 {
        let span = u32::from(self.listen.rtc_max_port - self.listen.rtc_min_port) + 1;
        let offset = self.next_port.fetch_add(1, Ordering::Relaxed) % span;
        // offset < span, so min + offset stays within the configured range
        u16::try_from(offset)
            .ok()
            .and_then(|offset| self.listen.rtc_min_port.checked_add(offset))
            .unwrap_or(self.listen.rtc_min_port)
    }
}

/// SHA-256 fingerprint of a freshly generated certificate.
fn certificate_fingerprint() -> DtlsFingerprint {
    let mut certificate = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut certificate);
    let digest = digest::digest(&digest::SHA256, &certificate);

    DtlsFingerprint {
        algorithm: "sha-256".to_string(),
        value: format_fingerprint(digest.as_ref()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::default_media_codecs;

    fn router() -> Router {
        Router::new(WorkerId(0), &default_media_codecs(), ListenConfig::default()).unwrap()
    }

    fn opus_parameters(payload_type: u8) -> RtpParameters {
        RtpParameters {
            mid: Some("0".to_string()),
            codecs: vec![RtpCodecParameters::from_capability(
                &RtpCodecCapability::audio("audio/opus", 48000, 2),
                payload_type,
            )],
            encodings: vec![RtpEncodingParameters { ssrc: Some(1111) }],
        }
    }

    #[test]
    fn test_payload_types_assigned_in_order() {
        let router = router();
        let pts: Vec<_> = router
            .rtp_capabilities()
            .codecs
            .iter()
            .map(|c| c.preferred_payload_type)
            .collect();
        assert_eq!(pts, vec![Some(100), Some(101)]);
    }

    #[test]
    fn test_vp8_keeps_start_bitrate() {
        let router = router();
        let vp8 = router.rtp_capabilities().codec_for_kind(MediaKind::Video).unwrap();
        assert_eq!(vp8.mime_type, "video/VP8");
        assert_eq!(vp8.clock_rate, 90000);
        assert_eq!(
            vp8.parameters.get("x-google-start-bitrate"),
            Some(&serde_json::json!(1000))
        );
    }

    #[test]
    fn test_kind_mismatch_fails_router_creation() {
        let mut codec = RtpCodecCapability::video("video/VP8", 90000);
        codec.kind = MediaKind::Audio;
        let result = Router::new(WorkerId(0), &[codec], ListenConfig::default());
        assert!(matches!(result, Err(MediaServerError::PoolInit(_))));
    }

    #[test]
    fn test_empty_codec_list_fails_router_creation() {
        let result = Router::new(WorkerId(0), &[], ListenConfig::default());
        assert!(matches!(result, Err(MediaServerError::PoolInit(_))));
    }

    #[test]
    fn test_transport_descriptor() {
        let router = router();
        let transport = router.create_transport();
        let info = transport.info();

        assert_eq!(info.ice_parameters.username_fragment.len(), ICE_UFRAG_LEN);
        assert_eq!(info.ice_parameters.password.len(), ICE_PASSWORD_BYTES * 2);
        assert_eq!(info.ice_candidates.len(), 2);
        assert!(info
            .ice_candidates
            .iter()
            .all(|c| c.ip == "127.0.0.1" && c.port >= 40000 && c.port <= 49999));
        assert!(info.dtls_parameters.validate().is_ok());
    }

    #[test]
    fn test_ports_stay_within_range() {
        let listen = ListenConfig {
            rtc_min_port: 50000,
            rtc_max_port: 50001,
            ..ListenConfig::default()
        };
        let router = Router::new(WorkerId(0), &default_media_codecs(), listen).unwrap();
        let ports: Vec<u16> = (0..5)
            .map(|_| router.create_transport().info().ice_candidates[0].port)
            .collect();
        assert_eq!(ports, vec![50000, 50001, 50000, 50001, 50000]);
    }

    #[test]
    fn test_validate_produce() {
        let router = router();
        assert!(router
            .validate_produce(MediaKind::Audio, &opus_parameters(111))
            .is_ok());

        let err = router
            .validate_produce(MediaKind::Video, &opus_parameters(111))
            .unwrap_err();
        assert!(matches!(err, MediaServerError::Negotiation(_)));

        let h264 = RtpParameters {
            codecs: vec![RtpCodecParameters::from_capability(
                &RtpCodecCapability::video("video/H264", 90000),
                102,
            )],
            ..RtpParameters::default()
        };
        assert!(router.validate_produce(MediaKind::Video, &h264).is_err());
        assert!(router
            .validate_produce(MediaKind::Audio, &RtpParameters::default())
            .is_err());
    }

    #[test]
    fn test_can_consume_requires_caller_support() {
        let router = router();
        let producer = opus_parameters(111);

        assert!(router.can_consume(&producer, router.rtp_capabilities()));

        let video_only = RtpCapabilities {
            codecs: vec![RtpCodecCapability::video("video/VP8", 90000)],
        };
        assert!(!router.can_consume(&producer, &video_only));
        assert!(!router.can_consume(&producer, &RtpCapabilities::default()));
    }

    #[test]
    fn test_consumer_parameters_use_caller_payload_type() {
        let router = router();
        let caps = RtpCapabilities {
            codecs: vec![RtpCodecCapability::audio("audio/OPUS", 48000, 2).with_payload_type(96)],
        };
        let params = router
            .consumer_rtp_parameters(&opus_parameters(111), &caps)
            .unwrap();
        let codec = params.media_codec().unwrap();
        assert_eq!(codec.payload_type, 96);
        assert_eq!(codec.mime_type, "audio/opus");
        assert!(params.encodings[0].ssrc.is_some());
    }
}
