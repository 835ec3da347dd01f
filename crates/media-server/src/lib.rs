//! Proctoring Media Server Library
//!
//! Coordinates media sessions between examinees (publishers) and proctors
//! (subscribers):
//!
//! - A fixed pool of media workers, each hosting one router
//! - One media session per signaling connection, owning its transports,
//!   producers and consumers
//! - A JSON request/response signaling protocol over WebSocket
//! - Resolution of "subscribe to these participants" into consumers
//!
//! # Architecture
//!
//! ```text
//! WorkerPool (fixed, round-robin)
//! └── Worker ── Router (codec set, transport factory)
//!
//! signaling task (one per WebSocket)
//! └── ConnectionActor
//!     └── ConnectionSession ──registers──> ProducerDirectory (shared)
//!         ├── Transport (ICE/DTLS, consumers)
//!         └── Producer
//! ```
//!
//! Sessions on different workers see each other's producers through the
//! shared `ProducerDirectory`; the resolver turns a participant list into
//! consumers on the requesting session's transport.
//!
//! # Modules
//!
//! - [`actors`] - Connection actor and per-connection session state
//! - [`config`] - Service configuration from environment
//! - [`engine`] - Workers, routers, transports, producers and consumers
//! - [`errors`] - Error types mapped to signaling error codes
//! - [`observability`] - Health, status and Prometheus metrics
//! - [`pool`] - Worker pool with round-robin assignment
//! - [`resolver`] - Participant list to consumer resolution
//! - [`signaling`] - WebSocket signaling endpoint

#![warn(clippy::pedantic)]

pub mod actors;
pub mod config;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod pool;
pub mod resolver;
pub mod signaling;
