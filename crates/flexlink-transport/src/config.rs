use std::time::Duration;

/// Configuration shared by the socket transports.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum time to wait for a connection to be established.
    pub connect_timeout: Duration,
    /// How long an idle read blocks before reporting "no data yet".
    ///
    /// Also bounds a single blocked write so stalls surface to the caller.
    pub poll_interval: Duration,
    /// Disable Nagle's algorithm on TCP streams.
    pub nodelay: bool,
    /// Read chunk size hint reported to the engine.
    pub read_chunk_size: Option<usize>,
    /// Write chunk size hint reported to the engine.
    pub write_chunk_size: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            nodelay: true,
            read_chunk_size: None,
            write_chunk_size: None,
        }
    }
}
