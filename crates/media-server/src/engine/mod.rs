//! In-process model of the media engine.
//!
//! The engine negotiates and tracks media state (routers, transports,
//! producers, consumers) but never touches RTP payloads.
//!
//! ```text
//! Worker (tokio task)
//! └── Router (capabilities, transport factory, can_consume)
//!     └── Transport (owned by one ConnectionSession)
//!         ├── Producer ids (producers live in the session map)
//!         └── Consumers
//! ```

pub mod consumer;
pub mod directory;
pub mod producer;
pub mod router;
pub mod transport;
pub mod worker;

pub use consumer::Consumer;
pub use directory::ProducerDirectory;
pub use producer::Producer;
pub use router::Router;
pub use transport::{Transport, TransportState};
pub use worker::{Worker, WorkerDied};

use signaling_protocol::rtp::RtpCodecCapability;

/// The fixed codec list every router is built from.
///
/// Opus stereo audio and VP8 video with a 1 Mbps start bitrate hint.
#[must_use]
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::audio("audio/opus", 48000, 2),
        RtpCodecCapability::video("video/VP8", 90000)
            .with_parameter("x-google-start-bitrate", serde_json::json!(1000)),
    ]
}
