use bytes::BytesMut;

use crate::error::{FrameError, Result};

/// One pipeline buffer: encoded requests waiting to go out, plus the number
/// of response bytes the target will send back for them.
///
/// Appends are bounds-checked against the buffer capacity, which is the
/// negotiated chunk bound. A full buffer is transmitted in one physical
/// write.
#[derive(Debug)]
pub struct PendingBatch {
    buf: BytesMut,
    capacity: usize,
    requests: usize,
    expected: usize,
    in_flight: bool,
}

impl PendingBatch {
    /// Create an empty batch bounded to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            requests: 0,
            expected: 0,
            in_flight: false,
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if `len` more bytes fit.
    pub fn fits(&self, len: usize) -> bool {
        self.buf.len() + len <= self.capacity
    }

    /// Append one encoded request and record the size of its response.
    ///
    /// A batch that has been sent must be [`reset`](Self::reset) before it
    /// is refilled.
    pub fn append(&mut self, frame: &[u8], response_len: usize) -> Result<()> {
        if !self.fits(frame.len()) {
            return Err(FrameError::BatchOverflow {
                needed: self.buf.len() + frame.len(),
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(frame);
        self.requests += 1;
        self.expected += response_len;
        Ok(())
    }

    /// Encoded request bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of requests in the batch.
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Response bytes still owed by the target for this batch.
    pub fn expected_response_len(&self) -> usize {
        self.expected
    }

    /// True if no request has been appended.
    pub fn is_empty(&self) -> bool {
        self.requests == 0
    }

    /// True between [`mark_sent`](Self::mark_sent) and
    /// [`reset`](Self::reset).
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Record that the batch has been transmitted. The request bytes are
    /// released; the response bookkeeping stays until the batch is drained.
    pub fn mark_sent(&mut self) {
        self.buf.clear();
        self.in_flight = true;
    }

    /// Clear everything, ready for reuse.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.requests = 0;
        self.expected = 0;
        self.in_flight = false;
    }
}

/// Two alternating batches. One fills while the other's responses are
/// still on their way back.
#[derive(Debug)]
pub struct PingPong {
    batches: [PendingBatch; 2],
    current: usize,
}

impl PingPong {
    /// Create a pair of empty batches, each bounded to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            batches: [PendingBatch::new(capacity), PendingBatch::new(capacity)],
            current: 0,
        }
    }

    /// The batch being filled.
    pub fn current(&self) -> &PendingBatch {
        &self.batches[self.current]
    }

    /// The batch being filled.
    pub fn current_mut(&mut self) -> &mut PendingBatch {
        &mut self.batches[self.current]
    }

    /// The batch that is not being filled. If it is in flight, it was sent
    /// before the current one.
    pub fn other_mut(&mut self) -> &mut PendingBatch {
        &mut self.batches[1 - self.current]
    }

    /// Make the other batch current.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Reset both batches and return to the first one.
    pub fn reset(&mut self) {
        for batch in &mut self.batches {
            batch.reset();
        }
        self.current = 0;
    }
}
