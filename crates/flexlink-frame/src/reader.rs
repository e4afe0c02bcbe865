use bytes::BytesMut;
use flexlink_transport::Transport;
use tracing::trace;

use crate::codec::{decode_frame, hex, RawFrame};
use crate::error::Result;

/// Default size of a single transport read.
pub const DEFAULT_READ_CHUNK: usize = 4 * 1024;

/// Reassembles frames from a transport byte stream.
///
/// Frames carry no terminator: the command byte determines how many payload
/// bytes follow. The reader buffers whatever the transport delivers and
/// cuts complete frames off the front, so partial reads of any size are
/// handled internally.
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,
    chunk: Box<[u8]>,
}

impl FrameReader {
    /// Create a reader issuing transport reads of up to `chunk_size` bytes.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            buf: BytesMut::with_capacity(chunk_size * 2),
            chunk: vec![0u8; chunk_size].into_boxed_slice(),
        }
    }

    /// Return the next complete frame, reading from `transport` at most once.
    ///
    /// `Ok(None)` means the transport had nothing ready and no complete
    /// frame is buffered; call again. Transport errors propagate.
    pub fn poll_frame<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<Option<RawFrame>> {
        if let Some(frame) = decode_frame(&mut self.buf) {
            return Ok(Some(frame));
        }

        let n = transport.read(&mut self.chunk)?;
        if n == 0 {
            return Ok(None);
        }
        trace!(bytes = %hex(&self.chunk[..n]), "<=");
        self.buf.extend_from_slice(&self.chunk[..n]);
        Ok(decode_frame(&mut self.buf))
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(DEFAULT_READ_CHUNK)
    }
}
