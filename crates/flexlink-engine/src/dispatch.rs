//! Slave-side routing: decode target-initiated requests and hand them to
//! the peripheral whose address range contains them.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use flexlink_frame::codec::{get_value, put_value, CMD_WRITE};
use flexlink_frame::status::{read_class, slave_fail, STATUS_OK};
use flexlink_frame::{Op, RawFrame, Width};
use tracing::{trace, warn};

use crate::error::{EngineError, Result};
use crate::link::ReplySink;

/// Handles slave frames arriving from the target.
///
/// Runs on the reader thread in inline mode, so it must return promptly:
/// every frame behind it waits, master responses included.
pub trait SlaveHandler: Send + Sync {
    /// Handle one complete slave request, replying through `reply`.
    fn handle(&self, frame: &RawFrame, reply: &dyn ReplySink) -> Result<()>;
}

impl<F> SlaveHandler for F
where
    F: Fn(&RawFrame, &dyn ReplySink) -> Result<()> + Send + Sync,
{
    fn handle(&self, frame: &RawFrame, reply: &dyn ReplySink) -> Result<()> {
        self(frame, reply)
    }
}

/// A decoded slave request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveRequest {
    pub op: Op,
    pub width: Width,
    pub address: u32,
    /// Write data shifted into its byte lane of the aligned word.
    pub data: u32,
    /// Byte lanes the write touches.
    pub mask: u32,
}

impl SlaveRequest {
    /// Decode a slave frame.
    ///
    /// Reads are exactly 5 bytes on the wire; writes are 6, 7 or 9 bytes for
    /// byte, half and word. Anything else is a protocol error.
    pub fn parse(frame: &RawFrame) -> Result<Self> {
        if frame.is_master() {
            return Err(EngineError::Protocol(format!(
                "master frame {:#04x} routed to slave dispatch",
                frame.command
            )));
        }
        let width = Width::from_code(frame.command)
            .map_err(|err| EngineError::Protocol(err.to_string()))?;
        let op = if frame.command & CMD_WRITE != 0 {
            Op::Write
        } else {
            Op::Read
        };
        let expected = match op {
            Op::Read => 5,
            Op::Write => 5 + width.bytes(),
        };
        if frame.wire_len() != expected {
            return Err(EngineError::Protocol(format!(
                "slave {} frame is {} bytes, expected {expected}",
                if op == Op::Write { "write" } else { "read" },
                frame.wire_len()
            )));
        }

        let address = get_value(Width::Word, &frame.payload)?;
        let (data, mask) = match op {
            Op::Read => (0, 0),
            Op::Write => {
                let value = get_value(width, &frame.payload[4..])?;
                let shift = match width {
                    Width::Word => 0,
                    _ => 8 * (address & 3),
                };
                (value << shift, width.value_mask() << shift)
            }
        };
        Ok(Self {
            op,
            width,
            address,
            data,
            mask,
        })
    }
}

/// A peripheral emulated on the host.
///
/// Offsets are relative to the mapping base. Writes arrive word-aligned
/// with a byte-lane mask; reads pass the unaligned offset so narrow reads
/// can pick their lane.
pub trait Peripheral: Send + Sync {
    /// Read the word containing `offset`.
    fn read_word(&self, offset: u32) -> u32;

    /// Write the lanes of `data` selected by `mask`.
    fn write_word(&self, offset: u32, data: u32, mask: u32);

    /// Read a half-word, derived from [`read_word`](Self::read_word).
    fn read_half(&self, offset: u32) -> u16 {
        (self.read_word(offset) >> ((offset & 3) * 8)) as u16
    }

    /// Read a byte, derived from [`read_word`](Self::read_word).
    fn read_byte(&self, offset: u32) -> u8 {
        (self.read_word(offset) >> ((offset & 3) * 8)) as u8
    }
}

/// A peripheral placed in the target's slave address space.
#[derive(Clone)]
pub struct PeripheralMapping {
    base: u32,
    size: u32,
    handler: Arc<dyn Peripheral>,
}

impl PeripheralMapping {
    /// Map `handler` at `base`. The size is rounded up to a power of two.
    ///
    /// `base` must be word-aligned: write offsets are taken from the
    /// word-aligned request address.
    pub fn new(base: u32, size: u32, handler: Arc<dyn Peripheral>) -> Result<Self> {
        if base & 3 != 0 {
            return Err(EngineError::Config(format!(
                "peripheral base {base:#010x} is not word-aligned"
            )));
        }
        if size == 0 {
            return Err(EngineError::Config(format!(
                "peripheral at {base:#010x} has zero size"
            )));
        }
        let size = size
            .checked_next_power_of_two()
            .filter(|size| u64::from(base) + u64::from(*size) <= 1 << 32)
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "peripheral at {base:#010x} with size {size:#x} extends past 4 GiB"
                ))
            })?;
        Ok(Self {
            base,
            size,
            handler,
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size in bytes, a power of two.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Last address covered, inclusive.
    pub fn last(&self) -> u32 {
        self.base + (self.size - 1)
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.base && address - self.base < self.size
    }

    pub fn handler(&self) -> &Arc<dyn Peripheral> {
        &self.handler
    }
}

impl fmt::Debug for PeripheralMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeripheralMapping")
            .field("base", &format_args!("{:#010x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

/// Sorted, non-overlapping set of peripheral mappings.
#[derive(Debug, Clone, Default)]
pub struct PeripheralTable {
    mappings: Vec<PeripheralMapping>,
}

impl PeripheralTable {
    /// Build a table. Overlapping ranges are a configuration error.
    pub fn new(mut mappings: Vec<PeripheralMapping>) -> Result<Self> {
        mappings.sort_by_key(PeripheralMapping::base);
        for pair in mappings.windows(2) {
            if pair[1].base() <= pair[0].last() {
                return Err(EngineError::Config(format!(
                    "peripheral ranges overlap: {:#010x}..={:#010x} and {:#010x}..={:#010x}",
                    pair[0].base(),
                    pair[0].last(),
                    pair[1].base(),
                    pair[1].last()
                )));
            }
        }
        Ok(Self { mappings })
    }

    /// The mapping containing `address`, if any.
    pub fn lookup(&self, address: u32) -> Option<&PeripheralMapping> {
        let idx = self
            .mappings
            .partition_point(|mapping| mapping.base() <= address);
        let candidate = self.mappings.get(idx.checked_sub(1)?)?;
        candidate.contains(address).then_some(candidate)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeripheralMapping> {
        self.mappings.iter()
    }
}

/// Routes slave requests to a [`PeripheralTable`] and builds the replies.
#[derive(Debug, Clone)]
pub struct SlaveDispatcher {
    table: PeripheralTable,
}

impl SlaveDispatcher {
    pub fn new(table: PeripheralTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PeripheralTable {
        &self.table
    }

    /// Serve one request and return the encoded reply frame.
    pub fn serve(&self, request: &SlaveRequest) -> BytesMut {
        let mut reply = BytesMut::with_capacity(5);
        let write = request.op == Op::Write;
        trace!(
            op = if write { "W" } else { "R" },
            width = %request.width.tag(),
            addr = format_args!("{:#010x}", request.address),
            "slave request"
        );

        let Some(mapping) = self.table.lookup(request.address) else {
            warn!(
                addr = format_args!("{:#010x}", request.address),
                "slave access to unmapped address"
            );
            reply.extend_from_slice(&[slave_fail(write)]);
            return reply;
        };

        let peripheral = mapping.handler();
        match request.op {
            Op::Write => {
                let offset = (request.address & !3) - mapping.base();
                peripheral.write_word(offset, request.data, request.mask);
                reply.extend_from_slice(&[STATUS_OK]);
            }
            Op::Read => {
                let offset = request.address - mapping.base();
                let value = match request.width {
                    Width::Byte => u32::from(peripheral.read_byte(offset)),
                    Width::Half => u32::from(peripheral.read_half(offset)),
                    Width::Word => peripheral.read_word(offset),
                };
                reply.extend_from_slice(&[read_class(request.width) | STATUS_OK]);
                put_value(request.width, value, &mut reply);
            }
        }
        reply
    }
}

impl SlaveHandler for SlaveDispatcher {
    fn handle(&self, frame: &RawFrame, reply: &dyn ReplySink) -> Result<()> {
        let request = SlaveRequest::parse(frame)?;
        reply.reply(&self.serve(&request))
    }
}
