use std::time::{Duration, Instant};

use flexlink_transport::{Transport, TransportError};
use tracing::trace;

use crate::codec::hex;
use crate::error::Result;

/// Default time a write may make no progress before it is abandoned.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a completed [`FrameWriter::write_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Physical `write` calls that accepted at least one byte.
    pub calls: usize,
    /// Bytes written.
    pub bytes: usize,
}

/// Pushes whole buffers through a transport that may accept partial writes.
#[derive(Debug)]
pub struct FrameWriter<T> {
    inner: T,
    stall_timeout: Duration,
}

impl<T: Transport> FrameWriter<T> {
    /// Create a writer with the default stall timeout.
    pub fn new(inner: T) -> Self {
        Self::with_stall_timeout(inner, DEFAULT_STALL_TIMEOUT)
    }

    /// Create a writer that gives up after `stall_timeout` without progress.
    pub fn with_stall_timeout(inner: T, stall_timeout: Duration) -> Self {
        Self {
            inner,
            stall_timeout,
        }
    }

    /// Write every byte of `buf`, looping over partial writes.
    ///
    /// Zero-byte writes are retried until no progress has been made for the
    /// stall timeout, which fails with [`TransportError::WriteStalled`].
    /// Callers hold the send lock so frames from different writers never
    /// interleave.
    pub fn write_all(&self, buf: &[u8]) -> Result<WriteReport> {
        let mut report = WriteReport::default();
        let mut last_progress = Instant::now();
        while report.bytes < buf.len() {
            let n = self.inner.write(&buf[report.bytes..])?;
            if n == 0 {
                if last_progress.elapsed() >= self.stall_timeout {
                    return Err(TransportError::WriteStalled {
                        written: report.bytes,
                        total: buf.len(),
                    }
                    .into());
                }
                std::thread::yield_now();
                continue;
            }
            trace!(bytes = %hex(&buf[report.bytes..report.bytes + n]), "=>");
            report.calls += 1;
            report.bytes += n;
            last_progress = Instant::now();
        }
        Ok(report)
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Current stall timeout.
    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::FrameError;

    #[derive(Debug, Default)]
    struct Sink {
        data: Mutex<Vec<u8>>,
        max_write: usize,
        stall_first: Mutex<u32>,
    }

    impl Transport for Sink {
        fn read(&self, _buf: &mut [u8]) -> flexlink_transport::Result<usize> {
            Ok(0)
        }

        fn write(&self, buf: &[u8]) -> flexlink_transport::Result<usize> {
            let mut stalls = self.stall_first.lock().unwrap();
            if *stalls > 0 {
                *stalls -= 1;
                return Ok(0);
            }
            let n = buf.len().min(self.max_write);
            self.data.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&self) -> flexlink_transport::Result<()> {
            Ok(())
        }

        fn close(&self) {}

        fn name(&self) -> &'static str {
            "sink"
        }
    }

    #[test]
    fn whole_buffer_in_one_call() {
        let writer = FrameWriter::new(Sink {
            max_write: usize::MAX,
            ..Sink::default()
        });
        let report = writer.write_all(&[1, 2, 3, 4]).unwrap();
        assert_eq!(report, WriteReport { calls: 1, bytes: 4 });
        assert_eq!(*writer.get_ref().data.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn partial_writes_are_completed() {
        let writer = FrameWriter::new(Sink {
            max_write: 3,
            ..Sink::default()
        });
        let payload: Vec<u8> = (0..10).collect();
        let report = writer.write_all(&payload).unwrap();
        assert_eq!(report.calls, 4);
        assert_eq!(report.bytes, 10);
        assert_eq!(*writer.get_ref().data.lock().unwrap(), payload);
    }

    #[test]
    fn zero_writes_are_retried() {
        let writer = FrameWriter::new(Sink {
            max_write: usize::MAX,
            stall_first: Mutex::new(5),
            ..Sink::default()
        });
        let report = writer.write_all(&[9, 9]).unwrap();
        assert_eq!(report.calls, 1);
    }

    #[test]
    fn persistent_stall_times_out() {
        let writer = FrameWriter::with_stall_timeout(
            Sink {
                max_write: usize::MAX,
                stall_first: Mutex::new(u32::MAX),
                ..Sink::default()
            },
            Duration::from_millis(5),
        );
        let err = writer.write_all(&[1]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::WriteStalled {
                written: 0,
                total: 1
            })
        ));
    }

    #[test]
    fn empty_buffer_writes_nothing() {
        let writer = FrameWriter::new(Sink::default());
        assert_eq!(writer.write_all(&[]).unwrap(), WriteReport::default());
    }
}
