//! Wire protocol for the proctoring media core.
//!
//! This crate defines the JSON messages exchanged on two connections:
//! the media control connection between an exam client and the media
//! server, and the event connection between an exam client and the exam
//! backend.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod events;
pub mod message;
pub mod rtp;

pub use codec::{CodecError, MAX_FRAME_SIZE};
pub use events::{BackendCommand, BackendEvent};
pub use message::{
    ConsumerInfo, ErrorCode, Request, RequestEnvelope, ResponseBody, ResponseEnvelope,
    SignalError, TransportInfo,
};
pub use rtp::MediaKind;
