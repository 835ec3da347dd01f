//! Exam Client Library
//!
//! Client side of a proctored exam session. One `SessionOrchestrator`
//! drives an examinee (publisher) or a proctor (subscriber) through:
//!
//! - Admission against the exam backend over HTTP
//! - A media control connection to the media server
//! - Device capability negotiation with the server's router
//! - Publishing local audio/video or subscribing to examinees
//! - The backend event connection for lifecycle, cheating and chat events
//!
//! # Architecture
//!
//! ```text
//! SessionOrchestrator
//! ├── Admission (HTTP, trait)           exam backend
//! ├── SignalingClient (WebSocket)       media server
//! ├── EventChannel (WebSocket)          exam backend
//! ├── Device (codec set, DTLS identity)
//! ├── MediaCapture (trait)
//! └── LocalTransport / LocalProducer / RemoteStream
//! ```
//!
//! # Modules
//!
//! - [`admission`] - Session admission and participant list
//! - [`capture`] - Local media capture seam
//! - [`config`] - Client configuration from environment
//! - [`device`] - Device capability set
//! - [`errors`] - Client and session errors
//! - [`events`] - Backend event connection
//! - [`orchestrator`] - Session sequencing
//! - [`signaling`] - Media control connection
//! - [`transport`] - Local records of server media resources

#![warn(clippy::pedantic)]

pub mod admission;
pub mod capture;
pub mod config;
pub mod device;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod signaling;
pub mod transport;
