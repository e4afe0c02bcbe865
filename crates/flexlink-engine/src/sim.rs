//! In-process simulated target.
//!
//! [`SimTarget`] implements [`Transport`] by answering master requests from
//! a sparse memory, the way the FPGA bridge would. It also lets tests play
//! the target side of slave traffic: inject requests and collect the
//! host's replies.

use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use flexlink_frame::codec::{get_value, payload_code, put_value, INTERFACE_MASTER};
use flexlink_frame::status::{host_frame_len, STATUS_FAIL};
use flexlink_frame::{encode_frame, Command, Direction, Op, Width};
use flexlink_transport::{ChunkHints, Result, Transport, TransportError};
use tracing::trace;

use crate::engine::{HWID_MAGIC, HWID_REGISTER};

/// Device id that opens a [`SimTarget`].
pub const SIM_DEVICE: &str = "sim";

/// Gateware version reported by default.
pub const SIM_HW_VERSION: u16 = 1;

/// Simulated target settings.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Version in the low half of the hardware id.
    pub hw_version: u16,
    /// Most bytes one `write` call accepts.
    pub max_write: Option<usize>,
    /// Most bytes one `read` call returns.
    pub max_read: Option<usize>,
    /// Chunk hints reported to the engine.
    pub hints: ChunkHints,
    /// How long an idle read waits before returning nothing.
    pub poll_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            hw_version: SIM_HW_VERSION,
            max_write: None,
            max_read: None,
            hints: ChunkHints::default(),
            poll_interval: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    /// Word storage keyed by `address >> 2`, little-endian lanes.
    memory: HashMap<u32, u32>,
    faults: Vec<RangeInclusive<u32>>,
    inbound: BytesMut,
    outbound: VecDeque<u8>,
    cursor: u32,
    write_calls: u64,
    master_requests: u64,
    replies: Vec<Vec<u8>>,
    closed: bool,
}

/// A simulated FPGA bridge behind the [`Transport`] trait.
#[derive(Debug)]
pub struct SimTarget {
    state: Mutex<SimState>,
    readable: Condvar,
    replied: Condvar,
    config: SimConfig,
}

impl Default for SimTarget {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimTarget {
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            readable: Condvar::new(),
            replied: Condvar::new(),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make accesses to `range` fail with the status fail bit.
    pub fn add_fault(&self, range: RangeInclusive<u32>) {
        self.lock().faults.push(range);
    }

    /// Read a memory word directly.
    pub fn peek_word(&self, address: u32) -> u32 {
        self.lock()
            .memory
            .get(&(address >> 2))
            .copied()
            .unwrap_or(0)
    }

    /// Write a memory word directly.
    pub fn poke_word(&self, address: u32, value: u32) {
        self.lock().memory.insert(address >> 2, value);
    }

    /// Physical `write` calls that accepted data.
    pub fn write_calls(&self) -> u64 {
        self.lock().write_calls
    }

    /// Master requests served.
    pub fn master_requests(&self) -> u64 {
        self.lock().master_requests
    }

    /// Queue a raw frame for the host to read.
    pub fn inject(&self, frame: &[u8]) {
        let mut state = self.lock();
        state.outbound.extend(frame);
        drop(state);
        self.readable.notify_all();
    }

    /// Send a slave read request to the host.
    pub fn slave_read(&self, width: Width, address: u32) {
        let cmd = Command::new(Direction::Slave, Op::Read, width, false, 4);
        let mut frame = BytesMut::with_capacity(5);
        // Listed length and matching payload: cannot fail.
        if encode_frame(&cmd, &address.to_be_bytes(), &mut frame).is_ok() {
            self.inject(&frame);
        }
    }

    /// Send a slave write request to the host.
    pub fn slave_write(&self, width: Width, address: u32, value: u32) {
        let cmd = Command::new(Direction::Slave, Op::Write, width, false, 4 + width.bytes());
        let mut payload = BytesMut::with_capacity(8);
        payload.extend_from_slice(&address.to_be_bytes());
        put_value(width, value, &mut payload);
        let mut frame = BytesMut::with_capacity(9);
        if encode_frame(&cmd, &payload, &mut frame).is_ok() {
            self.inject(&frame);
        }
    }

    /// Slave replies received from the host so far.
    pub fn replies(&self) -> Vec<Vec<u8>> {
        self.lock().replies.clone()
    }

    /// Wait until at least `count` slave replies have arrived.
    pub fn wait_for_replies(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.replies.len() < count {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            state = self
                .replied
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.replies.clone()
    }

    fn is_faulted(state: &SimState, address: u32) -> bool {
        state.faults.iter().any(|range| range.contains(&address))
    }

    fn load(&self, state: &SimState, width: Width, address: u32) -> u32 {
        if address == HWID_REGISTER && width == Width::Word {
            return HWID_MAGIC | u32::from(self.config.hw_version);
        }
        let word = state.memory.get(&(address >> 2)).copied().unwrap_or(0);
        (word >> ((address & 3) * 8)) & width.value_mask()
    }

    fn store(state: &mut SimState, width: Width, address: u32, value: u32) {
        let shift = (address & 3) * 8;
        let mask = width.value_mask() << shift;
        let word = state.memory.entry(address >> 2).or_insert(0);
        *word = (*word & !mask) | ((value << shift) & mask);
    }

    /// Consume every complete frame the host has written.
    fn process(&self, state: &mut SimState) {
        loop {
            let Some(&first) = state.inbound.first() else {
                return;
            };
            let total = host_frame_len(first);
            if state.inbound.len() < total {
                return;
            }
            let frame = state.inbound.split_to(total);
            if first & INTERFACE_MASTER == 0 {
                state.replies.push(frame.to_vec());
                self.replied.notify_all();
            } else {
                self.serve_master(state, &frame);
            }
        }
    }

    fn serve_master(&self, state: &mut SimState, frame: &[u8]) {
        state.master_requests += 1;
        let Ok(cmd) = Command::from_byte(frame[0]) else {
            state
                .outbound
                .push_back(INTERFACE_MASTER | STATUS_FAIL);
            return;
        };
        let mut payload = &frame[1..];
        let address = if cmd.auto_inc {
            state.cursor
        } else {
            let Ok(address) = get_value(Width::Word, payload) else {
                state.outbound.push_back(INTERFACE_MASTER | STATUS_FAIL);
                return;
            };
            payload.advance(4);
            address
        };
        state.cursor = address.wrapping_add(cmd.width.bytes() as u32);
        trace!(
            op = ?cmd.op,
            width = %cmd.width.tag(),
            addr = format_args!("{address:#010x}"),
            "sim master request"
        );

        if Self::is_faulted(state, address) {
            state.outbound.push_back(INTERFACE_MASTER | STATUS_FAIL);
            return;
        }

        match cmd.op {
            Op::Read => {
                let value = self.load(state, cmd.width, address);
                let mut response = BytesMut::with_capacity(5);
                response.extend_from_slice(&[
                    INTERFACE_MASTER | (payload_code(cmd.width.bytes()) << 4),
                ]);
                put_value(cmd.width, value, &mut response);
                state.outbound.extend(&response[..]);
            }
            Op::Write => match get_value(cmd.width, payload) {
                Ok(value) => {
                    Self::store(state, cmd.width, address, value);
                    state.outbound.push_back(INTERFACE_MASTER);
                }
                Err(_) => state.outbound.push_back(INTERFACE_MASTER | STATUS_FAIL),
            },
        }
    }
}

impl Transport for SimTarget {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::DeviceUnavailable);
        }
        if state.outbound.is_empty() {
            state = self
                .readable
                .wait_timeout(state, self.config.poll_interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if state.closed {
                return Err(TransportError::DeviceUnavailable);
            }
        }
        let limit = self.config.max_read.unwrap_or(usize::MAX).max(1);
        let n = buf.len().min(state.outbound.len()).min(limit);
        for (slot, byte) in buf.iter_mut().zip(state.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::DeviceUnavailable);
        }
        let limit = self.config.max_write.unwrap_or(usize::MAX).max(1);
        let n = buf.len().min(limit);
        if n == 0 {
            return Ok(0);
        }
        state.write_calls += 1;
        state.inbound.extend_from_slice(&buf[..n]);
        self.process(&mut state);
        drop(state);
        self.readable.notify_all();
        Ok(n)
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::DeviceUnavailable);
        }
        state.outbound.clear();
        Ok(())
    }

    fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
        self.replied.notify_all();
    }

    fn chunk_hints(&self) -> ChunkHints {
        self.config.hints
    }

    fn name(&self) -> &'static str {
        "sim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sim: &SimTarget) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = sim.read(&mut buf).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn serves_full_and_auto_increment_requests() {
        let sim = SimTarget::default();
        // Word write 0x11223344 to 0x100, then auto-increment write 0x55667788.
        sim.write(&[0xEA, 0, 0, 1, 0, 0x11, 0x22, 0x33, 0x44]).unwrap();
        sim.write(&[0xBE, 0x55, 0x66, 0x77, 0x88]).unwrap();
        assert_eq!(drain(&sim), vec![0x80, 0x80]);
        assert_eq!(sim.peek_word(0x100), 0x1122_3344);
        assert_eq!(sim.peek_word(0x104), 0x5566_7788);

        // Half read at 0x102, then auto-increment to 0x104.
        sim.write(&[0xB1, 0, 0, 1, 2, 0x85]).unwrap();
        assert_eq!(drain(&sim), vec![0xA0, 0x11, 0x22, 0xA0, 0x77, 0x88]);
        assert_eq!(sim.master_requests(), 4);
    }

    #[test]
    fn hardware_id_register() {
        let sim = SimTarget::default();
        sim.write(&[0xB2, 0xE0, 0, 0, 0]).unwrap();
        assert_eq!(drain(&sim), vec![0xB0, 0x1e, 0x05, 0x00, 0x01]);
    }

    #[test]
    fn faults_set_the_status_bit() {
        let sim = SimTarget::default();
        sim.add_fault(0x2000..=0x2fff);
        sim.write(&[0xB2, 0, 0, 0x20, 0x04, 0xBE, 0, 0, 0, 1]).unwrap();
        assert_eq!(drain(&sim), vec![0x81, 0x81]);
    }

    #[test]
    fn partial_frames_wait_for_the_rest() {
        let sim = SimTarget::new(SimConfig {
            max_write: Some(2),
            ..SimConfig::default()
        });
        let frame = [0xB2, 0, 0, 0, 0x10];
        let mut offset = 0;
        while offset < frame.len() {
            offset += sim.write(&frame[offset..]).unwrap();
        }
        assert_eq!(sim.write_calls(), 3);
        assert_eq!(drain(&sim), vec![0xB0, 0, 0, 0, 0]);
    }

    #[test]
    fn records_slave_replies() {
        let sim = SimTarget::default();
        sim.write(&[0x30, 0x11, 0x22, 0x33, 0x44, 0x09, 0x00]).unwrap();
        assert_eq!(
            sim.replies(),
            vec![vec![0x30, 0x11, 0x22, 0x33, 0x44], vec![0x09], vec![0x00]]
        );
    }

    #[test]
    fn injected_requests_are_readable() {
        let sim = SimTarget::default();
        sim.slave_write(Width::Word, 0x1000_0000, 0x1122_3344);
        sim.slave_read(Width::Byte, 0x1000_0001);
        assert_eq!(
            drain(&sim),
            vec![
                0x6A, 0x10, 0, 0, 0, 0x11, 0x22, 0x33, 0x44, //
                0x30, 0x10, 0, 0, 0x01
            ]
        );
    }

    #[test]
    fn closed_target_is_unavailable() {
        let sim = SimTarget::default();
        sim.close();
        let mut buf = [0u8; 4];
        assert!(matches!(
            sim.read(&mut buf),
            Err(TransportError::DeviceUnavailable)
        ));
        assert!(matches!(
            sim.write(&[0x80]),
            Err(TransportError::DeviceUnavailable)
        ));
    }
}
