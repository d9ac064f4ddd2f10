//! Pluggable transport layer.
//!
//! Implement [`Transport`] over TCP, WebSocket, or any other byte-stream
//! protocol, then wrap it in a [`CodecTransport`] to get MTProto framing.

use std::fmt;

use rand::Rng;

/// A full-duplex byte-stream transport.
///
/// Implementations are expected to handle their own buffering.
/// The MTProto layer operates on complete *framed* messages.
pub trait Transport {
    /// The error type returned by read/write operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send raw bytes to the remote.
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receive the next complete frame (length prefix included) from the remote.
    ///
    /// Implementations should block until a full frame is available.
    fn recv(&mut self) -> Result<Vec<u8>, Self::Error>;
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// A frame violates the wire layout. Fatal to the connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit in the 32-bit length prefix.
    #[error("payload of {0} bytes does not fit a u32 length prefix")]
    TooLarge(usize),
    /// Fewer than 4 bytes: not even a length prefix.
    #[error("frame of {0} bytes is shorter than its length prefix")]
    TooShort(usize),
    /// The length prefix claims more bytes than are present.
    #[error("frame claims {claimed} bytes but only {available} are available")]
    Truncated {
        /// Length from the prefix.
        claimed:   usize,
        /// Bytes after the prefix.
        available: usize,
    },
    /// The length prefix exceeds the receiver's limit.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    Oversized {
        /// Length from the prefix.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// Padding outside `0..=3` bytes was requested.
    #[error("padding of {0} bytes is outside 0..=3")]
    InvalidPadding(usize),
}

// ─── PacketCodec ──────────────────────────────────────────────────────────────

/// An MTProto transport framing.
pub trait PacketCodec {
    /// The 4-byte tag sent once when the connection opens.
    fn tag(&self) -> [u8; 4];

    /// Frame `payload` for the wire.
    fn encode_packet(&self, payload: &[u8]) -> Result<Vec<u8>, FrameError>;

    /// Extract the payload from a complete frame, length prefix included.
    fn read_packet(&self, frame: &[u8]) -> Result<Vec<u8>, FrameError>;
}

fn length_prefix(len: usize) -> Result<[u8; 4], FrameError> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| FrameError::TooLarge(len))
}

/// Validate the prefix and return the frame cut to its claimed length.
fn checked_frame(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.len() < 4 {
        return Err(FrameError::TooShort(frame.len()));
    }
    let claimed = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let available = frame.len() - 4;
    if claimed > available {
        return Err(FrameError::Truncated { claimed, available });
    }
    Ok(&frame[..4 + claimed])
}

// ─── Intermediate ─────────────────────────────────────────────────────────────

/// [MTProto Intermediate] framing: `[4-byte LE length][payload]`.
///
/// [MTProto Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
#[derive(Clone, Copy, Debug, Default)]
pub struct Intermediate;

impl PacketCodec for Intermediate {
    fn tag(&self) -> [u8; 4] { [0xee; 4] }

    fn encode_packet(&self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        let header = length_prefix(payload.len())?;
        let mut out = Vec::with_capacity(4 + payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(payload);
        Ok(out)
    }

    fn read_packet(&self, frame: &[u8]) -> Result<Vec<u8>, FrameError> {
        Ok(checked_frame(frame)?[4..].to_vec())
    }
}

// ─── Padded intermediate ──────────────────────────────────────────────────────

/// [Padded intermediate] framing: `[4-byte LE length][payload][0..3 random bytes]`.
///
/// The length covers payload and padding, so frame sizes stop being a
/// multiple of 4. The reader drops `length % 4` trailing bytes, which is
/// exact for MTProto payloads (always 4-aligned).
///
/// [Padded intermediate]: https://core.telegram.org/mtproto/mtproto-transports#padded-intermediate
#[derive(Clone, Copy, Debug, Default)]
pub struct PaddedIntermediate;

impl PaddedIntermediate {
    /// Frame `payload` with exactly `pad` random padding bytes.
    pub fn encode_packet_with_padding(&self, payload: &[u8], pad: usize) -> Result<Vec<u8>, FrameError> {
        if pad > 3 {
            return Err(FrameError::InvalidPadding(pad));
        }
        let header = length_prefix(payload.len() + pad)?;

        let mut padding = [0u8; 3];
        rand::thread_rng().fill(&mut padding[..pad]);

        let mut out = Vec::with_capacity(4 + payload.len() + pad);
        out.extend_from_slice(&header);
        out.extend_from_slice(payload);
        out.extend_from_slice(&padding[..pad]);
        log::trace!("[padded] framed {} payload bytes + {pad} padding", payload.len());
        Ok(out)
    }
}

impl PacketCodec for PaddedIntermediate {
    fn tag(&self) -> [u8; 4] { [0xdd; 4] }

    fn encode_packet(&self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        let pad = rand::thread_rng().gen_range(0..4);
        self.encode_packet_with_padding(payload, pad)
    }

    fn read_packet(&self, frame: &[u8]) -> Result<Vec<u8>, FrameError> {
        let frame = checked_frame(frame)?;
        let pad = frame.len() % 4;
        Ok(frame[4..frame.len() - pad].to_vec())
    }
}

// ─── CodecTransport ───────────────────────────────────────────────────────────

/// Error from a [`CodecTransport`]: either the inner transport failed or a
/// frame was malformed.
#[derive(Debug)]
pub enum CodecError<E> {
    /// The wrapped transport failed.
    Transport(E),
    /// Framing failed.
    Frame(FrameError),
}

impl<E: fmt::Display> fmt::Display for CodecError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Frame(e)     => write!(f, "framing: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CodecError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Frame(e)     => Some(e),
        }
    }
}

impl<E> From<FrameError> for CodecError<E> {
    fn from(e: FrameError) -> Self { Self::Frame(e) }
}

/// Wraps a [`Transport`] and applies a [`PacketCodec`].
///
/// The codec tag is sent once, right before the first frame.
pub struct CodecTransport<T: Transport, C: PacketCodec> {
    inner:    T,
    codec:    C,
    init_sent: bool,
}

impl<T: Transport, C: PacketCodec> CodecTransport<T, C> {
    /// Wrap an existing transport.
    pub fn new(inner: T, codec: C) -> Self {
        Self { inner, codec, init_sent: false }
    }

    /// Frame and send one message.
    pub fn send_message(&mut self, data: &[u8]) -> Result<(), CodecError<T::Error>> {
        let frame = self.codec.encode_packet(data)?;
        if !self.init_sent {
            self.inner.send(&self.codec.tag()).map_err(CodecError::Transport)?;
            self.init_sent = true;
        }
        self.inner.send(&frame).map_err(CodecError::Transport)
    }

    /// Receive the next frame and strip its framing.
    pub fn recv_message(&mut self) -> Result<Vec<u8>, CodecError<T::Error>> {
        let frame = self.inner.recv().map_err(CodecError::Transport)?;
        Ok(self.codec.read_packet(&frame)?)
    }

    /// Access the underlying transport.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
