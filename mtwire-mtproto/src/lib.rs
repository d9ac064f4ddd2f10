//! MTProto transport framing.
//!
//! This crate handles:
//! * The [`PacketCodec`] abstraction over MTProto transport framings
//! * Intermediate framing (`[u32 len][payload]`)
//! * Padded intermediate framing (`[u32 len][payload][0..3 random bytes]`)
//! * A synchronous [`Transport`] wrapper that applies a codec
//!
//! It is intentionally transport-agnostic: bring your own TCP/WebSocket.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod transport;

pub use transport::{CodecError, CodecTransport, FrameError, Intermediate, PacketCodec, PaddedIntermediate, Transport};
