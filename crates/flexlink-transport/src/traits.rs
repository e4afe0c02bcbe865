use std::fmt;

use crate::error::Result;

/// Preferred I/O sizes reported by a transport.
///
/// USB bridges move data in fixed-size packets; sizing pipeline batches to
/// those packets keeps every physical write full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkHints {
    /// Preferred maximum size of a single read.
    pub read: Option<usize>,
    /// Preferred maximum size of a single write.
    pub write: Option<usize>,
}

/// A duplex byte stream to the target.
///
/// All methods take `&self` so one background reader and any number of
/// writers can share the transport behind an `Arc`. Implementations must
/// not interleave bytes of concurrent writes; callers serialize writes
/// themselves when frames must stay contiguous.
///
/// Read semantics:
/// - `Ok(n)` with `n > 0`: `n` bytes were delivered.
/// - `Ok(0)`: nothing is ready yet; try again. This is never EOF.
/// - `Err(TransportError::DeviceUnavailable)`: the far end is gone.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Read up to `buf.len()` bytes. May return fewer.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes. May accept fewer, including zero
    /// when the stream cannot take more right now.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Flush pending outbound bytes and discard stale inbound bytes.
    fn flush(&self) -> Result<()>;

    /// Shut the stream down. Blocked and future reads observe
    /// `DeviceUnavailable`.
    fn close(&self);

    /// Preferred chunk sizes, if the transport has any.
    fn chunk_hints(&self) -> ChunkHints {
        ChunkHints::default()
    }

    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }

    fn close(&self) {
        (**self).close()
    }

    fn chunk_hints(&self) -> ChunkHints {
        (**self).chunk_hints()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
