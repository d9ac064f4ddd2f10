//! Async MTProto framing over any tokio byte stream.
//!
//! [`FramedTransport`] applies a [`PacketCodec`] to an `AsyncRead + AsyncWrite`
//! stream: the codec tag goes out once before the first frame, and incoming
//! frames are read by their 4-byte length prefix.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use mtwire_mtproto::{FrameError, PacketCodec, PaddedIntermediate};

use crate::errors::TransportError;

/// Default cap on incoming frame size.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Padded intermediate framing over `S`.
pub type PaddedTransport<S> = FramedTransport<S, PaddedIntermediate>;

/// A byte stream with MTProto transport framing.
pub struct FramedTransport<S, C> {
    stream:        S,
    codec:         C,
    tag_sent:      bool,
    max_frame_len: usize,
}

impl<S, C> FramedTransport<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: PacketCodec,
{
    pub fn new(stream: S, codec: C) -> Self {
        Self::with_max_frame_len(stream, codec, DEFAULT_MAX_FRAME_LEN)
    }

    /// Like [`new`](Self::new), rejecting incoming frames longer than
    /// `max_frame_len` bytes (prefix excluded).
    pub fn with_max_frame_len(stream: S, codec: C, max_frame_len: usize) -> Self {
        Self { stream, codec, tag_sent: false, max_frame_len }
    }

    /// Frame and send one payload.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = self.codec.encode_packet(payload)?;
        if !self.tag_sent {
            self.stream.write_all(&self.codec.tag()).await?;
            self.tag_sent = true;
        }
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        tracing::trace!("[transport] sent frame of {} bytes", frame.len());
        Ok(())
    }

    /// Receive one frame and return its payload.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut prefix = [0u8; 4];
        self.stream.read_exact(&mut prefix).await?;
        let len = u32::from_le_bytes(prefix) as usize;
        if len > self.max_frame_len {
            tracing::warn!("[transport] rejecting {len}-byte frame (max {})", self.max_frame_len);
            return Err(FrameError::Oversized { len, max: self.max_frame_len }.into());
        }

        let mut frame = vec![0u8; 4 + len];
        frame[..4].copy_from_slice(&prefix);
        self.stream.read_exact(&mut frame[4..]).await?;
        tracing::trace!("[transport] received frame of {len} bytes");
        Ok(self.codec.read_packet(&frame)?)
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}
