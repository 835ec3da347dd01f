//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types for
//! the exam credential the client presents at admission and any other bearer
//! material that must never reach a log line.
//!
//! # Compile-Time Safety
//!
//! The key insight is that `SecretBox<T>` and `SecretString` implement `Debug`
//! with redaction, so any code that derives `Debug` on a struct containing secrets
//! will automatically get safe logging behavior. This makes it **impossible** to
//! accidentally log secrets via `{:?}` or tracing.
//!
//! # Memory Safety
//!
//! Secrets are automatically zeroized when dropped, preventing sensitive
//! data from lingering in memory after use.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct AdmissionRequest {
//!     exam_id: String,
//!     credential: SecretString,  // Safe: Debug shows "[REDACTED]"
//! }
//!
//! let req = AdmissionRequest {
//!     exam_id: "exam-42".to_string(),
//!     credential: SecretString::from("eyJhbGciOi"),
//! };
//!
//! // The credential is redacted
//! println!("{:?}", req);
//!
//! // Reading the value requires an explicit call
//! let credential: &str = req.credential.expose_secret();
//! ```
//!
//! Use `SecretString` for bearer credentials and session tokens; use
//! `SecretBox<T>` for binary key material.
//!
//! # Serde Integration
//!
//! With the `serde` feature enabled, secrets can be deserialized from JSON:
//!
//! ```rust
//! use serde::Deserialize;
//! use common::secret::SecretString;
//!
//! #[derive(Debug, Deserialize)]
//! struct Ticket {
//!     session_id: SecretString,
//! }
//!
//! let json = r#"{"session_id": "sess-123"}"#;
//! let ticket: Ticket = serde_json::from_str(json).unwrap();
//!
//! // Debug output is safe
//! println!("{:?}", ticket);
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
