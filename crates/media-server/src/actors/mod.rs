//! Actor model for per-connection media state.
//!
//! ```text
//! signaling task (one per WebSocket)
//! └── ConnectionActor (mpsc mailbox, oneshot replies)
//!     └── ConnectionSession (transports, producers, consumers)
//! ```
//!
//! Cancellation flows from the server's root token to a child token per
//! connection; cancelling a connection tears its session down.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod session;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::ConnectionMessage;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use session::{ConnectionSession, SessionSnapshot};
