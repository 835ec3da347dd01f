//! # Media Test Utilities
//!
//! Shared test utilities for the media server and the exam client.
//!
//! ## Modules
//!
//! - `server_harness` - `TestMediaServer`, a real signaling server on a random port
//! - `signal_client` - Raw signaling client for driving the server frame by frame
//! - `mock_backend` - Mock exam backend (admission, participant list, event WebSocket)
//! - `fixtures` - Client RTP capabilities, DTLS parameters and RTP parameters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use media_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestMediaServer::spawn().await?;
//!     let mut client = SignalingTestClient::connect(&server.ws_url()).await?;
//!
//!     let transport_id = client.connected_transport().await?;
//!     let producer_id = client
//!         .produce(transport_id, MediaKind::Audio, "examinee-1")
//!         .await?;
//!
//!     assert_eq!(server.live_producer_count().await, 1);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod mock_backend;
pub mod server_harness;
pub mod signal_client;

pub use fixtures::*;
pub use mock_backend::MockBackend;
pub use server_harness::TestMediaServer;
pub use signal_client::SignalingTestClient;
