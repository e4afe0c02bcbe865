use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::traits::{ChunkHints, Transport};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const DRAIN_CHUNK_SIZE: usize = 4 * 1024;

/// A connected socket stream used as a target transport.
///
/// Reads and writes carry a timeout of `poll_interval`, so an idle stream
/// returns `Ok(0)` instead of blocking the reader thread indefinitely.
pub struct StreamTransport {
    inner: StreamInner,
    hints: ChunkHints,
}

enum StreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl StreamTransport {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream, config: &TransportConfig) -> Result<Self> {
        stream.set_nodelay(config.nodelay)?;
        let transport = Self {
            inner: StreamInner::Tcp(stream),
            hints: hints_from(config),
        };
        transport.set_timeouts(config.poll_interval)?;
        Ok(transport)
    }

    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(
        stream: std::os::unix::net::UnixStream,
        config: &TransportConfig,
    ) -> Result<Self> {
        let transport = Self {
            inner: StreamInner::Unix(stream),
            hints: hints_from(config),
        };
        transport.set_timeouts(config.poll_interval)?;
        Ok(transport)
    }

    fn set_timeouts(&self, poll_interval: Duration) -> Result<()> {
        let timeout = Some(poll_interval.max(MIN_POLL_INTERVAL));
        match &self.inner {
            StreamInner::Tcp(stream) => {
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)?;
            }
            #[cfg(unix)]
            StreamInner::Unix(stream) => {
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)?;
            }
        }
        Ok(())
    }

    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        match &self.inner {
            StreamInner::Tcp(stream) => stream.set_nonblocking(nonblocking),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.set_nonblocking(nonblocking),
        }
    }

    fn raw_read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &self.inner {
            StreamInner::Tcp(stream) => (&*stream).read(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => (&*stream).read(buf),
        }
    }
}

fn hints_from(config: &TransportConfig) -> ChunkHints {
    ChunkHints {
        read: config.read_chunk_size,
        write: config.write_chunk_size,
    }
}

fn is_idle(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

impl Transport for StreamTransport {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.raw_read(buf) {
            Ok(0) => Err(TransportError::DeviceUnavailable),
            Ok(n) => Ok(n),
            Err(err) if is_idle(err.kind()) => Ok(0),
            Err(err) if is_disconnect(err.kind()) => Err(TransportError::DeviceUnavailable),
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let result = match &self.inner {
            StreamInner::Tcp(stream) => (&*stream).write(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => (&*stream).write(buf),
        };
        match result {
            Ok(n) => Ok(n),
            Err(err) if is_idle(err.kind()) => Ok(0),
            Err(err) if is_disconnect(err.kind()) => Err(TransportError::DeviceUnavailable),
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn flush(&self) -> Result<()> {
        match &self.inner {
            StreamInner::Tcp(stream) => (&*stream).flush()?,
            #[cfg(unix)]
            StreamInner::Unix(stream) => (&*stream).flush()?,
        }

        // Discard anything the target sent before we were ready for it.
        self.set_nonblocking(true)?;
        let mut scratch = [0u8; DRAIN_CHUNK_SIZE];
        let mut discarded = 0usize;
        let outcome = loop {
            match self.raw_read(&mut scratch) {
                Ok(0) => break Err(TransportError::DeviceUnavailable),
                Ok(n) => discarded += n,
                Err(err) if is_idle(err.kind()) => break Ok(()),
                Err(err) => break Err(TransportError::Io(err)),
            }
        };
        self.set_nonblocking(false)?;
        if discarded > 0 {
            debug!(discarded, "discarded stale inbound bytes");
        }
        outcome
    }

    fn close(&self) {
        let result = match &self.inner {
            StreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        if let Err(err) = result {
            if err.kind() != ErrorKind::NotConnected {
                debug!(%err, "socket shutdown failed");
            }
        }
    }

    fn chunk_hints(&self) -> ChunkHints {
        self.hints
    }

    fn name(&self) -> &'static str {
        match &self.inner {
            StreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            StreamInner::Unix(_) => "unix-domain-socket",
        }
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("type", &self.name())
            .field("hints", &self.hints)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn pair() -> (StreamTransport, UnixStream) {
        let (left, right) = UnixStream::pair().unwrap();
        let transport = StreamTransport::from_unix(left, &TransportConfig::default()).unwrap();
        (transport, right)
    }

    #[test]
    fn idle_read_returns_zero() {
        let (transport, _peer) = pair();
        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn read_and_write_pass_bytes() {
        let (transport, mut peer) = pair();
        peer.write_all(&[1, 2, 3]).unwrap();

        let mut buf = [0u8; 8];
        let mut got = Vec::new();
        while got.len() < 3 {
            let n = transport.read(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, vec![1, 2, 3]);

        assert_eq!(transport.write(&[9, 8]).unwrap(), 2);
        let mut back = [0u8; 2];
        peer.read_exact(&mut back).unwrap();
        assert_eq!(back, [9, 8]);
    }

    #[test]
    fn peer_hangup_is_device_unavailable() {
        let (transport, peer) = pair();
        drop(peer);
        let mut buf = [0u8; 4];
        let err = transport.read(&mut buf).unwrap_err();
        assert!(matches!(err, TransportError::DeviceUnavailable));
    }

    #[test]
    fn close_unblocks_reader() {
        let (transport, _peer) = pair();
        transport.close();
        let mut buf = [0u8; 4];
        let err = transport.read(&mut buf).unwrap_err();
        assert!(matches!(err, TransportError::DeviceUnavailable));
    }

    #[test]
    fn flush_discards_stale_input() {
        let (transport, mut peer) = pair();
        peer.write_all(&[0xAA; 32]).unwrap();
        transport.flush().unwrap();

        let mut buf = [0u8; 32];
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn hints_come_from_config() {
        let (left, _right) = UnixStream::pair().unwrap();
        let config = TransportConfig {
            write_chunk_size: Some(512),
            ..TransportConfig::default()
        };
        let transport = StreamTransport::from_unix(left, &config).unwrap();
        assert_eq!(transport.chunk_hints().write, Some(512));
        assert_eq!(transport.chunk_hints().read, None);
        assert_eq!(transport.name(), "unix-domain-socket");
    }
}
