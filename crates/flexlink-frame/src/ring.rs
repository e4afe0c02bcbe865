use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::codec::{payload_len, RawFrame, MAX_PAYLOAD};
use crate::error::{FrameError, Result};

/// Bounded blocking byte ring carrying master responses from the reader
/// thread to callers.
///
/// `write` blocks while the ring is full and `read` blocks while it is
/// empty. Both are partial-transfer primitives: a call moves at most one
/// contiguous run of bytes and returns how many it moved. Bytes are never
/// overwritten or dropped.
///
/// Closing the ring wakes every waiter. Writers then fail immediately;
/// readers drain what is left and fail once the ring is empty.
pub struct ResponseChannel {
    state: Mutex<RingState>,
    space_avail: Condvar,
    data_avail: Condvar,
}

struct RingState {
    buf: Box<[u8]>,
    widx: usize,
    ridx: usize,
    full: bool,
    closed: bool,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn space(&self) -> usize {
        if self.full {
            0
        } else if self.widx >= self.ridx {
            self.capacity() - (self.widx - self.ridx)
        } else {
            self.ridx - self.widx
        }
    }

    fn data(&self) -> usize {
        self.capacity() - self.space()
    }
}

impl ResponseChannel {
    /// Create a ring holding up to `capacity` bytes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
                widx: 0,
                ridx: 0,
                full: false,
                closed: false,
            }),
            space_avail: Condvar::new(),
            data_avail: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.lock().data()
    }

    /// True if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the ring and wake all waiters.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);
        self.space_avail.notify_all();
        self.data_avail.notify_all();
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Write some bytes, blocking while the ring is full.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.write_timeout(buf, None)
    }

    /// Write some bytes, blocking at most `timeout` while the ring is full.
    pub fn write_timeout(&self, buf: &[u8], timeout: Option<Duration>) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = timeout.map(|t| (Instant::now() + t, t));
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(FrameError::ChannelClosed);
            }
            if state.space() > 0 {
                break;
            }
            state = wait(&self.space_avail, state, deadline)?;
        }

        let contiguous = if state.ridx > state.widx {
            state.ridx - state.widx
        } else {
            state.capacity() - state.widx
        };
        let n = contiguous.min(buf.len());
        let widx = state.widx;
        state.buf[widx..widx + n].copy_from_slice(&buf[..n]);
        state.widx = (widx + n) % state.capacity();
        if state.widx == state.ridx {
            state.full = true;
        }
        drop(state);
        self.data_avail.notify_one();
        Ok(n)
    }

    /// Read some bytes, blocking while the ring is empty.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_timeout(buf, None)
    }

    /// Read some bytes, blocking at most `timeout` while the ring is empty.
    pub fn read_timeout(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = timeout.map(|t| (Instant::now() + t, t));
        let mut state = self.lock();
        loop {
            if state.data() > 0 {
                break;
            }
            if state.closed {
                return Err(FrameError::ChannelClosed);
            }
            state = wait(&self.data_avail, state, deadline)?;
        }

        let contiguous = if state.widx > state.ridx {
            state.widx - state.ridx
        } else {
            state.capacity() - state.ridx
        };
        let n = contiguous.min(buf.len());
        let ridx = state.ridx;
        buf[..n].copy_from_slice(&state.buf[ridx..ridx + n]);
        state.ridx = (ridx + n) % state.capacity();
        state.full = false;
        drop(state);
        self.space_avail.notify_one();
        Ok(n)
    }

    /// Write every byte of `buf`, blocking as needed.
    pub fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Fill `buf` completely. `timeout` bounds the whole call.
    pub fn read_exact(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => Some(
                    deadline
                        .checked_duration_since(Instant::now())
                        .ok_or(FrameError::Timeout(timeout))?,
                ),
                _ => None,
            };
            filled += self.read_timeout(&mut buf[filled..], remaining)?;
        }
        Ok(())
    }

    /// Read one complete frame: the command byte, then exactly the payload
    /// length it declares.
    pub fn read_frame(&self, timeout: Option<Duration>) -> Result<RawFrame> {
        let mut cmd = [0u8; 1];
        self.read_exact(&mut cmd, timeout)?;
        let len = payload_len(cmd[0]);
        let mut payload = [0u8; MAX_PAYLOAD];
        self.read_exact(&mut payload[..len], timeout)?;
        Ok(RawFrame::new(cmd[0], Bytes::copy_from_slice(&payload[..len])))
    }
}

fn wait<'a>(
    cond: &Condvar,
    guard: MutexGuard<'a, RingState>,
    deadline: Option<(Instant, Duration)>,
) -> Result<MutexGuard<'a, RingState>> {
    match deadline {
        None => Ok(cond.wait(guard).unwrap_or_else(PoisonError::into_inner)),
        Some((deadline, timeout)) => {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or(FrameError::Timeout(timeout))?;
            let (guard, _) = cond
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            Ok(guard)
        }
    }
}

impl std::fmt::Debug for ResponseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ResponseChannel")
            .field("capacity", &state.capacity())
            .field("buffered", &state.data())
            .field("closed", &state.closed)
            .finish()
    }
}
