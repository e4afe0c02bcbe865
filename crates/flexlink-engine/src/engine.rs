use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use flexlink_frame::reader::DEFAULT_READ_CHUNK;
use flexlink_frame::status::host_frame_len;
use flexlink_frame::{is_master_frame, Op, PingPong, RawFrame, Width};
use flexlink_transport::Transport;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dispatch::SlaveHandler;
use crate::error::{EngineError, Result};
use crate::link::{Link, LinkStats};
use crate::reader;
use crate::sim::{SimTarget, SIM_DEVICE};
use crate::transfer::{next_response, Pipeline};

/// Base of the target's system control block.
pub const SYSCTL_BASE: u32 = 0xE000_0000;
/// Hardware id register.
pub const HWID_REGISTER: u32 = SYSCTL_BASE;
/// Upper half of a valid hardware id.
pub const HWID_MAGIC: u32 = 0x1e05_0000;

/// A value that travels on the bus at its natural width.
pub trait BusValue: Copy + Default + Send + 'static {
    const WIDTH: Width;

    fn from_bus(raw: u32) -> Self;
    fn to_bus(self) -> u32;
}

impl BusValue for u8 {
    const WIDTH: Width = Width::Byte;

    fn from_bus(raw: u32) -> Self {
        raw as u8
    }

    fn to_bus(self) -> u32 {
        u32::from(self)
    }
}

impl BusValue for u16 {
    const WIDTH: Width = Width::Half;

    fn from_bus(raw: u32) -> Self {
        raw as u16
    }

    fn to_bus(self) -> u32 {
        u32::from(self)
    }
}

impl BusValue for u32 {
    const WIDTH: Width = Width::Word;

    fn from_bus(raw: u32) -> Self {
        raw
    }

    fn to_bus(self) -> u32 {
        self
    }
}

/// Decoded hardware id register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareId(pub u32);

impl HardwareId {
    /// True if the magic half matches.
    pub fn is_valid(self) -> bool {
        self.0 & 0xffff_0000 == HWID_MAGIC
    }

    /// Gateware version.
    pub fn version(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

/// Host side of a flexlink connection.
///
/// Owns the transport, the reader thread, the response ring and the
/// pipeline buffers. Master transfers from any number of threads are
/// serialized; slave frames from the target are routed to the registered
/// handler while dispatch is enabled.
///
/// Protocol, timeout and transport failures invalidate the instance; every
/// later call returns [`EngineError::Closed`]. Bus faults do not.
pub struct Engine {
    link: Arc<Link>,
    api: Mutex<PingPong>,
    config: EngineConfig,
    chunk_bound: usize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Open a device with default configuration.
    ///
    /// `"sim"` opens an in-process simulated target; other ids are passed
    /// to [`flexlink_transport::open`].
    pub fn open(id: &str) -> Result<Self> {
        Self::open_with_config(id, EngineConfig::default())
    }

    /// Open a device with explicit configuration.
    pub fn open_with_config(id: &str, config: EngineConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = if id == SIM_DEVICE {
            Arc::new(SimTarget::default())
        } else {
            Arc::new(flexlink_transport::open(id, &config.transport)?)
        };
        info!(device = id, transport = transport.name(), "opening target");
        Self::with_transport(transport, config)
    }

    /// Start an engine over an already-connected transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let hints = transport.chunk_hints();
        let chunk_bound = config.chunk_bound(hints)?;
        let ring_capacity = config.ring_capacity(chunk_bound);

        transport.flush()?;

        let link = Arc::new(Link::new(
            transport,
            ring_capacity,
            config.write_stall_timeout,
        ));
        let threads = reader::spawn(
            Arc::clone(&link),
            config.dispatch,
            hints.read.unwrap_or(DEFAULT_READ_CHUNK),
        )?;
        debug!(chunk_bound, ring_capacity, dispatch = ?config.dispatch, "engine started");

        Ok(Self {
            link,
            api: Mutex::new(PingPong::new(chunk_bound)),
            config,
            chunk_bound,
            threads: Mutex::new(threads),
        })
    }

    fn lock_api(&self) -> MutexGuard<'_, PingPong> {
        self.api.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transfer(
        &self,
        op: Op,
        width: Width,
        address: u32,
        count: usize,
        value_at: impl Fn(usize) -> u32,
        deliver: impl FnMut(usize, u32),
    ) -> Result<()> {
        let mut batches = self.lock_api();
        Pipeline::new(
            &self.link,
            &mut batches,
            self.config.response_timeout,
            op,
            width,
            address,
        )
        .run(count, value_at, deliver)
    }

    /// Read `out.len()` consecutive values starting at `address`.
    ///
    /// On a bus fault, elements before the faulting index hold valid data.
    pub fn read<T: BusValue>(&self, address: u32, out: &mut [T]) -> Result<()> {
        let count = out.len();
        self.transfer(
            Op::Read,
            T::WIDTH,
            address,
            count,
            |_| 0,
            |index, raw| out[index] = T::from_bus(raw),
        )
    }

    /// Write consecutive values starting at `address`.
    pub fn write<T: BusValue>(&self, address: u32, data: &[T]) -> Result<()> {
        self.transfer(
            Op::Write,
            T::WIDTH,
            address,
            data.len(),
            |index| data[index].to_bus(),
            |_, _| {},
        )
    }

    /// Read `count` values into a new vector.
    pub fn read_vec<T: BusValue>(&self, address: u32, count: usize) -> Result<Vec<T>> {
        let mut out = vec![T::default(); count];
        self.read(address, &mut out)?;
        Ok(out)
    }

    pub fn read_words(&self, address: u32, out: &mut [u32]) -> Result<()> {
        self.read(address, out)
    }

    pub fn read_halves(&self, address: u32, out: &mut [u16]) -> Result<()> {
        self.read(address, out)
    }

    pub fn read_bytes(&self, address: u32, out: &mut [u8]) -> Result<()> {
        self.read(address, out)
    }

    pub fn write_words(&self, address: u32, data: &[u32]) -> Result<()> {
        self.write(address, data)
    }

    pub fn write_halves(&self, address: u32, data: &[u16]) -> Result<()> {
        self.write(address, data)
    }

    pub fn write_bytes(&self, address: u32, data: &[u8]) -> Result<()> {
        self.write(address, data)
    }

    /// Read one word register.
    pub fn reg_read(&self, address: u32) -> Result<u32> {
        let mut value = [0u32];
        self.read(address, &mut value)?;
        Ok(value[0])
    }

    /// Write one word register.
    pub fn reg_write(&self, address: u32, value: u32) -> Result<()> {
        self.write(address, &[value])
    }

    /// Read the hardware id register.
    pub fn hardware_id(&self) -> Result<HardwareId> {
        self.reg_read(HWID_REGISTER).map(HardwareId)
    }

    /// Write raw frames to the transport as one unit.
    ///
    /// Only slave replies may be sent this way. Master requests are
    /// rejected with [`EngineError::Config`]: their responses would be left
    /// in the response ring and misalign every later transfer. Use
    /// [`send_resp`](Self::send_resp) for those.
    pub fn send(&self, raw: &[u8]) -> Result<()> {
        let _batches = self.lock_api();
        self.link.check()?;
        let requests = count_master_requests(raw)?;
        if requests > 0 {
            return Err(EngineError::Config(format!(
                "raw bytes carry {requests} master request(s); use send_resp"
            )));
        }
        self.link.send(raw).map(|_| ())
    }

    /// Write raw frames and collect one response per master request.
    ///
    /// Runs under the API lock, so the responses are consumed before any
    /// other transfer can start. Bus faults come back as failure frames,
    /// not as errors.
    pub fn send_resp(&self, raw: &[u8]) -> Result<Vec<RawFrame>> {
        let _batches = self.lock_api();
        self.link.check()?;
        let requests = count_master_requests(raw)?;
        self.link.send(raw)?;

        let mut responses = Vec::with_capacity(requests);
        for _ in 0..requests {
            match next_response(&self.link, self.config.response_timeout) {
                Ok(frame) => responses.push(frame),
                Err(err) => {
                    if err.is_fatal() {
                        self.link.fail(&err);
                    }
                    return Err(err);
                }
            }
        }
        debug!(bytes = raw.len(), requests, "raw send");
        Ok(responses)
    }

    /// Install the handler for slave frames, replacing any previous one.
    pub fn register_slave_callback(&self, handler: impl SlaveHandler + 'static) {
        self.link.set_handler(Some(Arc::new(handler)));
        debug!("slave handler registered");
    }

    /// Disable slave dispatch and remove the handler.
    pub fn unregister_slave_callback(&self) -> Result<()> {
        if self.link.slave_gate() {
            self.slave_enable(false)?;
        }
        self.link.set_handler(None);
        debug!("slave handler removed");
        Ok(())
    }

    /// Enable or disable slave dispatch.
    ///
    /// Enabling requires a registered handler. With a configured
    /// `slave_enable_register`, the target side is switched too.
    pub fn slave_enable(&self, enable: bool) -> Result<()> {
        self.link.check()?;
        if enable && self.link.handler().is_none() {
            return Err(EngineError::Config(
                "no slave handler registered".to_string(),
            ));
        }
        let register = self.config.slave_enable_register;
        if enable {
            self.link.set_slave_gate(true);
            if let Some(register) = register {
                self.reg_write(register, 1)?;
            }
        } else {
            if let Some(register) = register {
                self.reg_write(register, 0)?;
            }
            self.link.set_slave_gate(false);
        }
        info!(enabled = enable, "slave dispatch");
        Ok(())
    }

    /// True while slave dispatch is enabled.
    pub fn slave_enabled(&self) -> bool {
        self.link.slave_gate()
    }

    /// Traffic counters.
    pub fn stats(&self) -> LinkStats {
        self.link.stats()
    }

    /// Negotiated batch bound in bytes.
    pub fn chunk_bound(&self) -> usize {
        self.chunk_bound
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Name of the underlying transport.
    pub fn transport_name(&self) -> &'static str {
        self.link.transport().name()
    }

    /// True until the engine is closed or invalidated.
    pub fn is_open(&self) -> bool {
        self.link.check().is_ok()
    }

    /// Why the engine was invalidated, if it was.
    pub fn failure(&self) -> Option<String> {
        self.link.failure()
    }

    /// Stop the reader, close the transport and release buffers. Safe to
    /// call more than once.
    pub fn close(&self) {
        self.link.set_slave_gate(false);
        if self.link.shut_down() {
            info!(transport = self.link.transport().name(), "closing target");
        }
        let handles: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("engine thread panicked");
            }
        }
        self.lock_api().reset();
    }
}

/// Number of master requests in a raw host byte stream. The bytes must
/// hold whole frames.
fn count_master_requests(raw: &[u8]) -> Result<usize> {
    let mut rest = raw;
    let mut requests = 0;
    while let Some(&first) = rest.first() {
        let len = host_frame_len(first);
        if rest.len() < len {
            return Err(EngineError::Config(format!(
                "raw bytes end inside a {len}-byte frame starting with {first:#04x}"
            )));
        }
        requests += usize::from(is_master_frame(first));
        rest = &rest[len..];
    }
    Ok(requests)
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("link", &self.link)
            .field("chunk_bound", &self.chunk_bound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_id_decodes() {
        let id = HardwareId(0x1e05_0003);
        assert!(id.is_valid());
        assert_eq!(id.version(), 3);
        assert!(!HardwareId(0xdead_0003).is_valid());
    }

    #[test]
    fn bus_values_truncate_to_width() {
        assert_eq!(u8::from_bus(0x1234), 0x34);
        assert_eq!(u16::from_bus(0x1234_5678), 0x5678);
        assert_eq!(<u16 as BusValue>::WIDTH, Width::Half);
        assert_eq!(0xABu8.to_bus(), 0xAB);
    }

    #[test]
    fn master_requests_are_counted_per_frame() {
        assert_eq!(count_master_requests(&[]).unwrap(), 0);
        // Word read, then a slave OK reply, then an auto-increment read.
        let raw = [0xB2, 0, 0, 1, 0, 0x00, 0x86];
        assert_eq!(count_master_requests(&raw).unwrap(), 2);
        assert_eq!(count_master_requests(&[0x30, 1, 2, 3, 4]).unwrap(), 0);
        assert!(matches!(
            count_master_requests(&[0xB2, 0, 0]),
            Err(EngineError::Config(_))
        ));
    }
}
