use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use flexlink_frame::{FrameWriter, ResponseChannel, WriteReport};
use flexlink_transport::Transport;
use tracing::{debug, error};

use crate::dispatch::SlaveHandler;
use crate::error::{EngineError, Result};

/// Traffic counters for one engine instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Physical transport write calls that moved data.
    pub transport_writes: u64,
    /// Bytes handed to the transport.
    pub bytes_sent: u64,
    /// Master response frames received.
    pub master_frames: u64,
    /// Slave request frames received.
    pub slave_frames: u64,
}

#[derive(Debug, Default)]
struct Counters {
    transport_writes: AtomicU64,
    bytes_sent: AtomicU64,
    master_frames: AtomicU64,
    slave_frames: AtomicU64,
}

/// Destination for slave replies. Replies go out under the send lock so
/// they never split a master batch.
pub trait ReplySink {
    /// Write one complete reply frame.
    fn reply(&self, frame: &[u8]) -> Result<()>;
}

/// State shared by the engine API, the reader thread and the dispatcher.
pub(crate) struct Link {
    transport: Arc<dyn Transport>,
    send: Mutex<FrameWriter<Arc<dyn Transport>>>,
    pub(crate) ring: ResponseChannel,
    shutdown: AtomicBool,
    failure: Mutex<Option<String>>,
    slave_enabled: AtomicBool,
    handler: RwLock<Option<Arc<dyn SlaveHandler>>>,
    counters: Counters,
}

impl Link {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        ring_capacity: usize,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            send: Mutex::new(FrameWriter::with_stall_timeout(
                Arc::clone(&transport),
                stall_timeout,
            )),
            transport,
            ring: ResponseChannel::new(ring_capacity),
            shutdown: AtomicBool::new(false),
            failure: Mutex::new(None),
            slave_enabled: AtomicBool::new(false),
            handler: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn lock_send(&self) -> MutexGuard<'_, FrameWriter<Arc<dyn Transport>>> {
        self.send.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail unless the link is open and healthy.
    pub(crate) fn check(&self) -> Result<()> {
        if let Some(reason) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Err(EngineError::Closed(reason.clone()));
        }
        if self.is_shut_down() {
            return Err(EngineError::Closed("engine closed".to_string()));
        }
        Ok(())
    }

    /// Write `bytes` to the transport as one unit under the send lock.
    pub(crate) fn send(&self, bytes: &[u8]) -> Result<WriteReport> {
        self.check()?;
        let writer = self.lock_send();
        let report = match writer.write_all(bytes) {
            Ok(report) => report,
            Err(err) => {
                let err = EngineError::from(err);
                self.fail(&err);
                return Err(err);
            }
        };
        drop(writer);
        self.counters
            .transport_writes
            .fetch_add(report.calls as u64, Ordering::Relaxed);
        self.counters
            .bytes_sent
            .fetch_add(report.bytes as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Flip the slave gate while holding the send lock, so it never
    /// changes in the middle of a frame.
    pub(crate) fn set_slave_gate(&self, enabled: bool) {
        let _writer = self.lock_send();
        self.slave_enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn slave_gate(&self) -> bool {
        self.slave_enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn SlaveHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_handler(&self, handler: Option<Arc<dyn SlaveHandler>>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Invalidate the link. The first reason sticks; the response ring is
    /// closed so blocked callers wake up.
    pub(crate) fn fail(&self, err: &EngineError) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() && !self.is_shut_down() {
            error!(%err, "link failed; engine must be reopened");
            *failure = Some(err.to_string());
        }
        drop(failure);
        self.ring.close();
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Begin shutdown. Returns false if it had already begun.
    pub(crate) fn shut_down(&self) -> bool {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!(transport = self.transport.name(), "shutting down link");
        self.transport.close();
        self.ring.close();
        true
    }

    pub(crate) fn count_master_frame(&self) {
        self.counters.master_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_slave_frame(&self) {
        self.counters.slave_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> LinkStats {
        LinkStats {
            transport_writes: self.counters.transport_writes.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            master_frames: self.counters.master_frames.load(Ordering::Relaxed),
            slave_frames: self.counters.slave_frames.load(Ordering::Relaxed),
        }
    }
}

impl ReplySink for Link {
    fn reply(&self, frame: &[u8]) -> Result<()> {
        self.send(frame).map(|_| ())
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("transport", &self.transport.name())
            .field("ring", &self.ring)
            .field("slave_enabled", &self.slave_gate())
            .field("shutdown", &self.is_shut_down())
            .finish()
    }
}
