use std::os::unix::net::UnixStream;
use std::path::Path;

use tracing::debug;

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::stream::StreamTransport;

/// Connect to a target bridge (or simulator) listening on a Unix socket.
pub fn connect(path: impl AsRef<Path>, config: &TransportConfig) -> Result<StreamTransport> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
        addr: path.display().to_string(),
        source: e,
    })?;
    debug!(?path, "connected to unix domain socket");
    StreamTransport::from_unix(stream, config)
}
