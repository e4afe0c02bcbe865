/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The device id could not be parsed into an endpoint.
    #[error("invalid device address '{0}'")]
    InvalidAddress(String),

    /// The device id names a transport this build cannot open.
    #[error("unsupported transport for device '{0}'")]
    Unsupported(String),

    /// The far end went away; no further reads or writes are possible.
    #[error("device not available")]
    DeviceUnavailable,

    /// A write made no progress before the stall deadline.
    #[error("write stalled after {written} of {total} bytes")]
    WriteStalled { written: usize, total: usize },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// True when the transport can no longer be used and must be reopened.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportError::DeviceUnavailable | TransportError::Shutdown
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
