//! Device capability set.
//!
//! A `Device` starts with the codecs this client can natively encode and
//! decode. Loading it with the router's capabilities keeps only the codecs
//! both sides support, using the router's payload types. Publish and
//! subscribe require a loaded device.

use crate::errors::ClientError;
use rand::Rng;
use ring::digest;
use signaling_protocol::rtp::{
    format_fingerprint, DtlsFingerprint, DtlsParameters, DtlsRole, MediaKind, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters, RtpParameters,
};
use tracing::debug;

/// Local endpoint capabilities and DTLS identity.
#[derive(Debug, Clone)]
pub struct Device {
    native: RtpCapabilities,
    loaded: Option<RtpCapabilities>,
    dtls_parameters: DtlsParameters,
}

impl Device {
    /// Device supporting `native` codecs, with a fresh DTLS fingerprint.
    #[must_use]
    pub fn new(native: RtpCapabilities) -> Self {
        let certificate: [u8; 32] = rand::thread_rng().gen();
        let fingerprint = digest::digest(&digest::SHA256, &certificate);

        Self {
            native,
            loaded: None,
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: format_fingerprint(fingerprint.as_ref()),
                }],
            },
        }
    }

    /// Codecs a typical browser-class endpoint handles.
    #[must_use]
    pub fn native_codecs() -> RtpCapabilities {
        RtpCapabilities {
            codecs: vec![
                RtpCodecCapability::audio("audio/opus", 48000, 2),
                RtpCodecCapability::video("video/VP8", 90000),
                RtpCodecCapability::video("video/H264", 90000),
            ],
        }
    }

    /// Intersect the native codecs with the router's.
    ///
    /// Reloading replaces the previous intersection.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NoCommonCodecs` when nothing overlaps; the
    /// device stays unloaded.
    pub fn load(&mut self, router_capabilities: &RtpCapabilities) -> Result<(), ClientError> {
        let codecs: Vec<RtpCodecCapability> = router_capabilities
            .codecs
            .iter()
            .filter(|router_codec| self.native.codecs.iter().any(|n| n.matches(router_codec)))
            .cloned()
            .collect();

        if codecs.is_empty() {
            self.loaded = None;
            return Err(ClientError::NoCommonCodecs);
        }

        debug!(
            target: "client.device",
            codecs = codecs.len(),
            "Device capabilities loaded"
        );
        self.loaded = Some(RtpCapabilities { codecs });
        Ok(())
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// The negotiated capability set.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::DeviceNotLoaded` before `load`.
    pub fn rtp_capabilities(&self) -> Result<&RtpCapabilities, ClientError> {
        self.loaded.as_ref().ok_or(ClientError::DeviceNotLoaded)
    }

    /// Whether media of `kind` can be sent.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::DeviceNotLoaded` before `load`.
    pub fn can_produce(&self, kind: MediaKind) -> Result<bool, ClientError> {
        Ok(self.rtp_capabilities()?.codec_for_kind(kind).is_some())
    }

    /// RTP parameters for sending one track of `kind`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::DeviceNotLoaded` before `load`, or
    /// `ClientError::NoCommonCodecs` when no codec of that kind was negotiated.
    pub fn send_rtp_parameters(
        &self,
        kind: MediaKind,
        mid: impl Into<String>,
    ) -> Result<RtpParameters, ClientError> {
        let capability = self
            .rtp_capabilities()?
            .codec_for_kind(kind)
            .ok_or(ClientError::NoCommonCodecs)?;
        let payload_type = capability.preferred_payload_type.unwrap_or(match kind {
            MediaKind::Audio => 111,
            MediaKind::Video => 96,
        });

        Ok(RtpParameters {
            mid: Some(mid.into()),
            codecs: vec![RtpCodecParameters::from_capability(capability, payload_type)],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(rand::thread_rng().gen()),
            }],
        })
    }

    /// DTLS parameters presented in `connect_transport`.
    #[must_use]
    pub fn dtls_parameters(&self) -> &DtlsParameters {
        &self.dtls_parameters
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new(Self::native_codecs())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn router_caps() -> RtpCapabilities {
        RtpCapabilities {
            codecs: vec![
                RtpCodecCapability::audio("audio/opus", 48000, 2).with_payload_type(100),
                RtpCodecCapability::video("video/VP8", 90000)
                    .with_parameter("x-google-start-bitrate", serde_json::json!(1000))
                    .with_payload_type(101),
            ],
        }
    }

    #[test]
    fn test_unloaded_device_rejects_use() {
        let device = Device::default();
        assert!(!device.is_loaded());
        assert!(matches!(
            device.rtp_capabilities(),
            Err(ClientError::DeviceNotLoaded)
        ));
        assert!(matches!(
            device.send_rtp_parameters(MediaKind::Audio, "0"),
            Err(ClientError::DeviceNotLoaded)
        ));
    }

    #[test]
    fn test_load_intersects_with_router() {
        let mut device = Device::default();
        device.load(&router_caps()).unwrap();

        let caps = device.rtp_capabilities().unwrap();
        assert_eq!(caps.codecs.len(), 2);
        assert!(device.can_produce(MediaKind::Video).unwrap());

        // H264 is native only, so it is dropped
        assert!(caps
            .codecs
            .iter()
            .all(|c| !c.mime_type.eq_ignore_ascii_case("video/H264")));
    }

    #[test]
    fn test_load_without_overlap_fails() {
        let mut device = Device::new(RtpCapabilities {
            codecs: vec![RtpCodecCapability::video("video/AV1", 90000)],
        });

        assert!(matches!(
            device.load(&router_caps()),
            Err(ClientError::NoCommonCodecs)
        ));
        assert!(!device.is_loaded());
    }

    #[test]
    fn test_audio_only_device() {
        let mut device = Device::new(RtpCapabilities {
            codecs: vec![RtpCodecCapability::audio("audio/OPUS", 48000, 2)],
        });
        device.load(&router_caps()).unwrap();

        assert!(device.can_produce(MediaKind::Audio).unwrap());
        assert!(!device.can_produce(MediaKind::Video).unwrap());
        assert!(matches!(
            device.send_rtp_parameters(MediaKind::Video, "1"),
            Err(ClientError::NoCommonCodecs)
        ));
    }

    #[test]
    fn test_send_parameters_use_router_payload_type() {
        let mut device = Device::default();
        device.load(&router_caps()).unwrap();

        let params = device.send_rtp_parameters(MediaKind::Video, "1").unwrap();
        let codec = params.media_codec().unwrap();
        assert_eq!(codec.payload_type, 101);
        assert_eq!(codec.mime_type, "video/VP8");
        assert_eq!(params.mid.as_deref(), Some("1"));
        assert!(params.encodings[0].ssrc.is_some());
    }

    #[test]
    fn test_dtls_parameters_are_valid() {
        let device = Device::default();
        device.dtls_parameters().validate().unwrap();
        assert_eq!(device.dtls_parameters().role, DtlsRole::Auto);
    }
}
