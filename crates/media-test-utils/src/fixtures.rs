//! Pre-configured protocol fixtures.

use signaling_protocol::rtp::{
    format_fingerprint, DtlsFingerprint, DtlsParameters, DtlsRole, MediaKind, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters, RtpParameters,
};

/// Capabilities of a client that supports Opus and VP8, with its own
/// payload types.
#[must_use]
pub fn client_rtp_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![
            RtpCodecCapability::audio("audio/opus", 48000, 2).with_payload_type(111),
            RtpCodecCapability::video("video/VP8", 90000).with_payload_type(96),
        ],
    }
}

/// Capabilities of a client that can only decode audio.
#[must_use]
pub fn audio_only_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![RtpCodecCapability::audio("audio/opus", 48000, 2).with_payload_type(111)],
    }
}

/// Client DTLS parameters with a well-formed SHA-256 fingerprint.
#[must_use]
pub fn dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: format_fingerprint(&[0xAB; 32]),
        }],
    }
}

/// Send-side RTP parameters for one track of `kind`.
#[must_use]
pub fn rtp_parameters(kind: MediaKind) -> RtpParameters {
    let (capability, payload_type, mid) = match kind {
        MediaKind::Audio => (RtpCodecCapability::audio("audio/opus", 48000, 2), 111, "0"),
        MediaKind::Video => (RtpCodecCapability::video("video/VP8", 90000), 96, "1"),
    };

    RtpParameters {
        mid: Some(mid.to_string()),
        codecs: vec![RtpCodecParameters::from_capability(&capability, payload_type)],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(match kind {
                MediaKind::Audio => 1111,
                MediaKind::Video => 2222,
            }),
        }],
    }
}

/// RTP parameters with a codec the server does not route.
#[must_use]
pub fn unsupported_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters::from_capability(
            &RtpCodecCapability::video("video/AV1", 90000),
            45,
        )],
        encodings: vec![RtpEncodingParameters::default()],
    }
}
