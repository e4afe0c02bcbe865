//! Byte-stream transports for the flexlink host engine.
//!
//! The engine talks to the FPGA bridge over a plain duplex byte stream.
//! This crate provides the [`Transport`] trait that stream must satisfy
//! plus socket implementations:
//! - TCP (`host[:port]`, default port 7878)
//! - Unix domain sockets (`unix:/path/to.sock`)
//!
//! This is the lowest layer of flexlink. Everything else builds on top of
//! the [`Transport`] trait provided here.

pub mod config;
pub mod error;
pub mod stream;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use config::TransportConfig;
pub use error::{Result, TransportError};
pub use stream::StreamTransport;
pub use traits::{ChunkHints, Transport};

/// Prefix selecting a Unix domain socket device.
pub const UNIX_PREFIX: &str = "unix:";

/// Open a transport from a device id.
///
/// Ids that look like network addresses (contain `:` or `.`) open a TCP
/// connection; `unix:<path>` opens a Unix socket. Anything else names a
/// USB bridge by serial number, which this build does not support.
pub fn open(id: &str, config: &TransportConfig) -> Result<StreamTransport> {
    if let Some(path) = id.strip_prefix(UNIX_PREFIX) {
        #[cfg(unix)]
        return uds::connect(path, config);
        #[cfg(not(unix))]
        {
            let _ = (path, config);
            return Err(TransportError::Unsupported(id.to_string()));
        }
    }

    if id.contains(':') || id.contains('.') {
        return tcp::connect(id, config);
    }

    Err(TransportError::Unsupported(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_number_ids_are_unsupported() {
        let err = open("FT4ABC12", &TransportConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));
    }

    #[test]
    fn terminal_errors_are_classified() {
        assert!(TransportError::DeviceUnavailable.is_terminal());
        assert!(TransportError::Shutdown.is_terminal());
        assert!(!TransportError::InvalidAddress("x".into()).is_terminal());
    }
}
