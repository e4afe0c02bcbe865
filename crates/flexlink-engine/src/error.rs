use std::time::Duration;

use flexlink_frame::FrameError;
use flexlink_transport::TransportError;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration: chunk bound, peripheral ranges, handler setup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The target sent something that does not fit the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A transaction failed at the target. Elements before `index` were
    /// delivered normally.
    #[error("bus fault at element {index} (address {address:#010x})")]
    BusFault { index: usize, address: u32 },

    /// No response arrived before the deadline.
    #[error("timed out after {0:?} waiting for the target")]
    Timeout(Duration),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// The engine is closed or was invalidated by an earlier failure.
    #[error("engine closed: {0}")]
    Closed(String),
}

impl EngineError {
    /// True when the engine instance can no longer be used and must be
    /// reopened. Bus faults are ordinary results and leave it usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Protocol(_)
                | EngineError::Timeout(_)
                | EngineError::Transport(_)
                | EngineError::Frame(_)
                | EngineError::Closed(_)
        )
    }
}

impl From<FrameError> for EngineError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Transport(err) => EngineError::Transport(err),
            FrameError::Timeout(after) => EngineError::Timeout(after),
            FrameError::UnlistedPayloadLength(_) | FrameError::BatchOverflow { .. } => {
                EngineError::Config(err.to_string())
            }
            other => EngineError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
