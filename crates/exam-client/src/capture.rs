//! Local media capture.
//!
//! Capture hardware sits behind `MediaCapture` so the orchestrator can be
//! driven by a real camera/microphone backend or by fixed test tracks.

use crate::errors::ClientError;
use async_trait::async_trait;
use signaling_protocol::rtp::MediaKind;

/// One captured local track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
}

impl LocalTrack {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
        }
    }
}

/// Source of local audio/video tracks.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Open the capture devices. Zero tracks is a valid outcome.
    async fn acquire(&self) -> Result<Vec<LocalTrack>, ClientError>;

    /// Stop the given tracks.
    async fn release(&self, tracks: &[LocalTrack]);
}

/// First track of `kind`.
#[must_use]
pub fn track_of_kind(tracks: &[LocalTrack], kind: MediaKind) -> Option<&LocalTrack> {
    tracks.iter().find(|t| t.kind == kind)
}

/// Fixed capture for tests and headless runs.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Capture that returns a preset list of tracks.
    pub struct StaticCapture {
        tracks: Vec<LocalTrack>,
        fail: bool,
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl StaticCapture {
        #[must_use]
        pub fn new(tracks: Vec<LocalTrack>) -> Self {
            Self {
                tracks,
                fail: false,
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }
        }

        /// One microphone and one camera track.
        #[must_use]
        pub fn audio_and_video() -> Self {
            Self::new(vec![
                LocalTrack::new("mic-0", MediaKind::Audio, "Test microphone"),
                LocalTrack::new("cam-0", MediaKind::Video, "Test camera"),
            ])
        }

        /// Microphone only; the camera is missing.
        #[must_use]
        pub fn audio_only() -> Self {
            Self::new(vec![LocalTrack::new(
                "mic-0",
                MediaKind::Audio,
                "Test microphone",
            )])
        }

        /// Capture that is denied access.
        #[must_use]
        pub fn denied() -> Self {
            Self {
                fail: true,
                ..Self::new(Vec::new())
            }
        }

        #[must_use]
        pub fn acquire_count(&self) -> usize {
            self.acquired.load(Ordering::SeqCst)
        }

        #[must_use]
        pub fn release_count(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaCapture for StaticCapture {
        async fn acquire(&self) -> Result<Vec<LocalTrack>, ClientError> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ClientError::Capture("permission denied".to_string()));
            }
            Ok(self.tracks.clone())
        }

        async fn release(&self, _tracks: &[LocalTrack]) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
