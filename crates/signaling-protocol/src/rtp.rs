//! RTP capability, RTP parameter and ICE/DTLS descriptor types.
//!
//! These mirror the structures exchanged by WebRTC SFUs: the router advertises
//! [`RtpCapabilities`], producers describe their stream with
//! [`RtpParameters`], and transports exchange ICE and DTLS descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Codec-specific format parameters (e.g. `x-google-start-bitrate`).
pub type CodecParameters = BTreeMap<String, serde_json::Value>;

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as a static string (also the MIME type prefix).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Derive the kind from a MIME type such as `audio/opus`.
    #[must_use]
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let (prefix, _) = mime_type.split_once('/')?;
        if prefix.eq_ignore_ascii_case("audio") {
            Some(MediaKind::Audio)
        } else if prefix.eq_ignore_ascii_case("video") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RTCP feedback mechanism supported by a codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

/// A codec the router or a device is able to handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: CodecParameters,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// Audio codec with an explicit channel count.
    #[must_use]
    pub fn audio(mime_type: impl Into<String>, clock_rate: u32, channels: u8) -> Self {
        Self {
            kind: MediaKind::Audio,
            mime_type: mime_type.into(),
            preferred_payload_type: None,
            clock_rate,
            channels: Some(channels),
            parameters: CodecParameters::new(),
            rtcp_feedback: Vec::new(),
        }
    }

    /// Video codec.
    #[must_use]
    pub fn video(mime_type: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            kind: MediaKind::Video,
            mime_type: mime_type.into(),
            preferred_payload_type: None,
            clock_rate,
            channels: None,
            parameters: CodecParameters::new(),
            rtcp_feedback: Vec::new(),
        }
    }

    /// Add a format-specific parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Set the preferred payload type.
    #[must_use]
    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.preferred_payload_type = Some(payload_type);
        self
    }

    /// Whether two capabilities describe the same codec.
    #[must_use]
    pub fn matches(&self, other: &RtpCodecCapability) -> bool {
        self.kind == other.kind
            && codec_matches(
                &self.mime_type,
                self.clock_rate,
                self.channels,
                &other.mime_type,
                other.clock_rate,
                other.channels,
            )
    }

    /// Whether a concrete codec in RTP parameters is an instance of this capability.
    #[must_use]
    pub fn matches_parameters(&self, codec: &RtpCodecParameters) -> bool {
        codec_matches(
            &self.mime_type,
            self.clock_rate,
            self.channels,
            &codec.mime_type,
            codec.clock_rate,
            codec.channels,
        )
    }
}

fn codec_matches(
    mime_a: &str,
    clock_a: u32,
    channels_a: Option<u8>,
    mime_b: &str,
    clock_b: u32,
    channels_b: Option<u8>,
) -> bool {
    if !mime_a.eq_ignore_ascii_case(mime_b) || clock_a != clock_b {
        return false;
    }

    // Audio codecs default to mono when the channel count is omitted
    match MediaKind::from_mime_type(mime_a) {
        Some(MediaKind::Audio) => channels_a.unwrap_or(1) == channels_b.unwrap_or(1),
        _ => true,
    }
}

/// The set of codecs an endpoint can send or receive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
}

impl RtpCapabilities {
    /// Whether no codec is advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Find the capability matching a concrete codec.
    #[must_use]
    pub fn find_matching(&self, codec: &RtpCodecParameters) -> Option<&RtpCodecCapability> {
        self.codecs.iter().find(|c| c.matches_parameters(codec))
    }

    /// First advertised codec of the given kind.
    #[must_use]
    pub fn codec_for_kind(&self, kind: MediaKind) -> Option<&RtpCodecCapability> {
        self.codecs.iter().find(|c| c.kind == kind)
    }
}

/// A concrete codec negotiated for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: CodecParameters,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    /// Build concrete parameters from a capability and a payload type.
    #[must_use]
    pub fn from_capability(capability: &RtpCodecCapability, payload_type: u8) -> Self {
        Self {
            mime_type: capability.mime_type.clone(),
            payload_type,
            clock_rate: capability.clock_rate,
            channels: capability.channels,
            parameters: capability.parameters.clone(),
            rtcp_feedback: capability.rtcp_feedback.clone(),
        }
    }

    /// Media kind derived from the MIME type.
    #[must_use]
    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime_type(&self.mime_type)
    }
}

/// One RTP encoding (simulcast layer) of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpEncodingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
}

/// Full description of one RTP stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
}

impl RtpParameters {
    /// The media codec of the stream (the first listed codec).
    #[must_use]
    pub fn media_codec(&self) -> Option<&RtpCodecParameters> {
        self.codecs.first()
    }
}

/// Local ICE credentials of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

/// Network protocol of an ICE candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Udp,
    Tcp,
}

/// A host candidate the remote side can reach the transport on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub protocol: TransportProtocol,
    #[serde(rename = "type")]
    pub candidate_type: String,
}

/// DTLS role negotiated for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

/// Certificate fingerprint advertised for DTLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS descriptor exchanged during `connect_transport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Hash algorithms accepted for certificate fingerprints, with digest sizes.
pub const FINGERPRINT_ALGORITHMS: &[(&str, usize)] = &[
    ("sha-1", 20),
    ("sha-224", 28),
    ("sha-256", 32),
    ("sha-384", 48),
    ("sha-512", 64),
];

/// Reasons a DTLS descriptor is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DtlsError {
    #[error("no DTLS fingerprints supplied")]
    NoFingerprints,

    #[error("unsupported fingerprint algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("malformed {algorithm} fingerprint")]
    MalformedDigest { algorithm: String },
}

impl DtlsFingerprint {
    /// Check the algorithm and the `AA:BB:…` digest format.
    ///
    /// # Errors
    ///
    /// Returns [`DtlsError`] when the algorithm is unknown or the digest does
    /// not have the expected length and format.
    pub fn validate(&self) -> Result<(), DtlsError> {
        let algorithm = self.algorithm.to_ascii_lowercase();
        let digest_len = FINGERPRINT_ALGORITHMS
            .iter()
            .find(|(name, _)| *name == algorithm)
            .map(|(_, len)| *len)
            .ok_or_else(|| DtlsError::UnsupportedAlgorithm(self.algorithm.clone()))?;

        let octets: Vec<&str> = self.value.split(':').collect();
        let well_formed = octets.len() == digest_len
            && octets
                .iter()
                .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));

        if well_formed {
            Ok(())
        } else {
            Err(DtlsError::MalformedDigest { algorithm })
        }
    }
}

impl DtlsParameters {
    /// Validate every fingerprint; at least one is required.
    ///
    /// # Errors
    ///
    /// Returns the first [`DtlsError`] encountered.
    pub fn validate(&self) -> Result<(), DtlsError> {
        if self.fingerprints.is_empty() {
            return Err(DtlsError::NoFingerprints);
        }
        self.fingerprints.iter().try_for_each(DtlsFingerprint::validate)
    }
}

/// Format raw digest bytes as an uppercase colon-separated fingerprint.
#[must_use]
pub fn format_fingerprint(digest: &[u8]) -> String {
    digest
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}
