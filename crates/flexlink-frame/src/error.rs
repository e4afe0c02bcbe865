use std::time::Duration;

/// Errors that can occur during frame encoding, decoding and buffering.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload length has no size code on the wire.
    #[error("payload length {0} has no wire encoding (allowed: 0,1,2,4,5,6,8,16)")]
    UnlistedPayloadLength(usize),

    /// The payload does not match the length the command byte declares.
    #[error("payload length mismatch (expected {expected}, got {actual})")]
    PayloadMismatch { expected: usize, actual: usize },

    /// The width field holds the reserved code 3.
    #[error("invalid width code {0}")]
    InvalidWidth(u8),

    /// A frame does not fit in a batch buffer even when the buffer is empty.
    #[error("frame of {needed} bytes overflows batch buffer ({capacity} bytes)")]
    BatchOverflow { needed: usize, capacity: usize },

    /// The response channel was closed while waiting on it.
    #[error("response channel closed")]
    ChannelClosed,

    /// A blocking wait exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] flexlink_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
