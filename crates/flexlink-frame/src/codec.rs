use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Payload lengths that have a wire encoding, indexed by size code.
pub const PAYLOAD_SIZES: [usize; 8] = [0, 1, 2, 4, 5, 6, 8, 16];

/// Largest payload any frame can carry.
pub const MAX_PAYLOAD: usize = 16;

/// Largest master request frame: command + address + word data.
pub const MAX_REQUEST_FRAME: usize = 1 + 4 + 4;

/// Interface bit: set for master traffic, clear for slave traffic.
pub const INTERFACE_MASTER: u8 = 0x80;
/// Write bit (clear = read).
pub const CMD_WRITE: u8 = 0x08;
/// Auto-increment bit: the frame omits the address.
pub const CMD_AUTOINC: u8 = 0x04;

const PAYLOAD_SHIFT: u8 = 4;
const PAYLOAD_MASK: u8 = 0x7;
const WIDTH_MASK: u8 = 0x3;

/// Which side of the link initiated the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host-initiated access into target memory.
    Master,
    /// Target-initiated access into host-emulated peripherals.
    Slave,
}

/// Transaction operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Read,
    Write,
}

/// Access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    /// Width in bytes (1, 2 or 4).
    pub const fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }

    /// Two-bit wire code: `bytes >> 1`.
    pub const fn code(self) -> u8 {
        (self.bytes() >> 1) as u8
    }

    /// Decode the two-bit width code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code & WIDTH_MASK {
            0 => Ok(Width::Byte),
            1 => Ok(Width::Half),
            2 => Ok(Width::Word),
            other => Err(FrameError::InvalidWidth(other)),
        }
    }

    /// Width for a byte count, if it is 1, 2 or 4.
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(Width::Byte),
            2 => Some(Width::Half),
            4 => Some(Width::Word),
            _ => None,
        }
    }

    /// Value mask covering `bytes()` bytes.
    pub const fn value_mask(self) -> u32 {
        match self {
            Width::Byte => 0xff,
            Width::Half => 0xffff,
            Width::Word => 0xffff_ffff,
        }
    }

    /// Single-letter tag used in traces.
    pub const fn tag(self) -> char {
        match self {
            Width::Byte => 'B',
            Width::Half => 'H',
            Width::Word => 'W',
        }
    }
}

/// Size code for a payload length.
///
/// Lengths missing from [`PAYLOAD_SIZES`] map to code 0. Use
/// [`Command::to_byte`] or [`encode_frame`] to reject them instead.
pub fn payload_code(len: usize) -> u8 {
    PAYLOAD_SIZES
        .iter()
        .position(|&size| size == len)
        .map_or(0, |code| code as u8)
}

/// Payload length that follows a command byte.
///
/// This is how frames are delimited on the stream: after the command byte,
/// exactly this many bytes complete the frame.
pub fn payload_len(cmd: u8) -> usize {
    PAYLOAD_SIZES[((cmd >> PAYLOAD_SHIFT) & PAYLOAD_MASK) as usize]
}

/// True if a payload length has a wire encoding.
pub fn is_listed_len(len: usize) -> bool {
    PAYLOAD_SIZES.contains(&len)
}

/// True if the command byte belongs to master traffic.
pub fn is_master_frame(cmd: u8) -> bool {
    cmd & INTERFACE_MASTER != 0
}

/// A decoded command byte.
///
/// Layout, bit 7 first:
/// ```text
/// ┌─────┬──────────┬───────┬─────────┬───────┐
/// │ [7] │ [6:4]    │ [3]   │ [2]     │ [1:0] │
/// │ M/S │ size code│ write │ autoinc │ width │
/// └─────┴──────────┴───────┴─────────┴───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    pub direction: Direction,
    pub op: Op,
    pub width: Width,
    pub auto_inc: bool,
    pub payload_len: usize,
}

impl Command {
    /// Create a command description.
    pub fn new(direction: Direction, op: Op, width: Width, auto_inc: bool, payload_len: usize) -> Self {
        Self {
            direction,
            op,
            width,
            auto_inc,
            payload_len,
        }
    }

    /// Encode into the command byte.
    pub fn to_byte(&self) -> Result<u8> {
        if !is_listed_len(self.payload_len) {
            return Err(FrameError::UnlistedPayloadLength(self.payload_len));
        }
        let mut cmd = payload_code(self.payload_len) << PAYLOAD_SHIFT;
        if self.direction == Direction::Master {
            cmd |= INTERFACE_MASTER;
        }
        if self.op == Op::Write {
            cmd |= CMD_WRITE;
        }
        if self.auto_inc {
            cmd |= CMD_AUTOINC;
        }
        Ok(cmd | self.width.code())
    }

    /// Decode a command byte.
    pub fn from_byte(cmd: u8) -> Result<Self> {
        Ok(Self {
            direction: if is_master_frame(cmd) {
                Direction::Master
            } else {
                Direction::Slave
            },
            op: if cmd & CMD_WRITE != 0 {
                Op::Write
            } else {
                Op::Read
            },
            width: Width::from_code(cmd & WIDTH_MASK)?,
            auto_inc: cmd & CMD_AUTOINC != 0,
            payload_len: payload_len(cmd),
        })
    }

    /// Total wire size of a frame with this command.
    pub fn frame_len(&self) -> usize {
        1 + self.payload_len
    }
}

/// One complete frame as seen on the wire: command byte plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// The command (or status) byte.
    pub command: u8,
    /// Payload bytes, `payload_len(command)` long.
    pub payload: Bytes,
}

impl RawFrame {
    /// Create a frame from its parts.
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// True if this is master traffic.
    pub fn is_master(&self) -> bool {
        is_master_frame(self.command)
    }

    /// Total wire size of this frame.
    pub fn wire_len(&self) -> usize {
        1 + self.payload.len()
    }

    /// Append the wire bytes of this frame to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_u8(self.command);
        dst.put_slice(&self.payload);
    }

    /// Wire bytes of this frame.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.push(self.command);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Encode a frame: command byte followed by the payload verbatim.
pub fn encode_frame(cmd: &Command, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() != cmd.payload_len {
        return Err(FrameError::PayloadMismatch {
            expected: cmd.payload_len,
            actual: payload.len(),
        });
    }
    let byte = cmd.to_byte()?;
    dst.reserve(1 + payload.len());
    dst.put_u8(byte);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from a buffer.
///
/// Returns `None` if the buffer doesn't hold a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Option<RawFrame> {
    let cmd = *src.first()?;
    let total = 1 + payload_len(cmd);
    if src.len() < total {
        return None;
    }
    src.advance(1);
    let payload = src.split_to(total - 1).freeze();
    Some(RawFrame {
        command: cmd,
        payload,
    })
}

/// Append `value` to `dst` big-endian, `width` bytes wide.
pub fn put_value(width: Width, value: u32, dst: &mut BytesMut) {
    match width {
        Width::Byte => dst.put_u8(value as u8),
        Width::Half => dst.put_u16(value as u16),
        Width::Word => dst.put_u32(value),
    }
}

/// Read a big-endian value of `width` bytes from the front of `src`.
pub fn get_value(width: Width, src: &[u8]) -> Result<u32> {
    if src.len() < width.bytes() {
        return Err(FrameError::PayloadMismatch {
            expected: width.bytes(),
            actual: src.len(),
        });
    }
    Ok(match width {
        Width::Byte => u32::from(src[0]),
        Width::Half => u32::from(u16::from_be_bytes([src[0], src[1]])),
        Width::Word => u32::from_be_bytes([src[0], src[1], src[2], src[3]]),
    })
}

/// Encode a master read request.
///
/// With `Some(address)` the frame carries the full big-endian address;
/// with `None` it is a one-byte auto-increment request.
pub fn encode_read_request(width: Width, address: Option<u32>, dst: &mut BytesMut) -> Result<()> {
    let (auto_inc, payload_len) = match address {
        Some(_) => (false, 4),
        None => (true, 0),
    };
    let cmd = Command::new(Direction::Master, Op::Read, width, auto_inc, payload_len);
    dst.reserve(cmd.frame_len());
    dst.put_u8(cmd.to_byte()?);
    if let Some(address) = address {
        dst.put_u32(address);
    }
    Ok(())
}

/// Encode a master write request.
///
/// With `Some(address)` the payload is address then data; with `None` it
/// is the data alone and the target auto-increments.
pub fn encode_write_request(
    width: Width,
    address: Option<u32>,
    value: u32,
    dst: &mut BytesMut,
) -> Result<()> {
    let (auto_inc, payload_len) = match address {
        Some(_) => (false, 4 + width.bytes()),
        None => (true, width.bytes()),
    };
    let cmd = Command::new(Direction::Master, Op::Write, width, auto_inc, payload_len);
    dst.reserve(cmd.frame_len());
    dst.put_u8(cmd.to_byte()?);
    if let Some(address) = address {
        dst.put_u32(address);
    }
    put_value(width, value, dst);
    Ok(())
}

/// Response size the target returns for one master request.
pub const fn response_len(op: Op, width: Width) -> usize {
    match op {
        Op::Read => 1 + width.bytes(),
        Op::Write => 1,
    }
}

/// Hex dump used by wire traces.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTHS: [Width; 3] = [Width::Byte, Width::Half, Width::Word];

    #[test]
    fn command_byte_roundtrip_for_listed_lengths() {
        for direction in [Direction::Master, Direction::Slave] {
            for op in [Op::Read, Op::Write] {
                for width in WIDTHS {
                    for auto_inc in [false, true] {
                        for len in PAYLOAD_SIZES {
                            let cmd = Command::new(direction, op, width, auto_inc, len);
                            let byte = cmd.to_byte().unwrap();
                            assert_eq!(Command::from_byte(byte).unwrap(), cmd);
                            assert_eq!(payload_len(byte), len);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn known_command_bytes() {
        // Full-address word read: master | D4 | read | word.
        let cmd = Command::new(Direction::Master, Op::Read, Width::Word, false, 4);
        assert_eq!(cmd.to_byte().unwrap(), 0x80 | (3 << 4) | 0x2);
        // Auto-increment byte write: master | D1 | write | autoinc | byte.
        let cmd = Command::new(Direction::Master, Op::Write, Width::Byte, true, 1);
        assert_eq!(cmd.to_byte().unwrap(), 0x80 | (1 << 4) | 0x08 | 0x04);
        // Slave half write: D6 | write | half.
        let cmd = Command::new(Direction::Slave, Op::Write, Width::Half, false, 6);
        assert_eq!(cmd.to_byte().unwrap(), (5 << 4) | 0x08 | 0x1);
    }

    #[test]
    fn unlisted_length_is_rejected() {
        let cmd = Command::new(Direction::Master, Op::Write, Width::Word, false, 3);
        assert!(matches!(
            cmd.to_byte(),
            Err(FrameError::UnlistedPayloadLength(3))
        ));
        assert_eq!(payload_code(3), 0);
        assert_eq!(payload_code(7), 0);
        assert_eq!(payload_code(16), 7);
    }

    #[test]
    fn reserved_width_code_is_rejected() {
        assert!(matches!(
            Command::from_byte(0x83),
            Err(FrameError::InvalidWidth(3))
        ));
    }

    #[test]
    fn master_classification() {
        assert!(is_master_frame(0x80));
        assert!(is_master_frame(0xF7));
        assert!(!is_master_frame(0x7F));
        assert!(!is_master_frame(0x00));
    }

    #[test]
    fn encode_frame_checks_payload() {
        let mut buf = BytesMut::new();
        let cmd = Command::new(Direction::Slave, Op::Read, Width::Word, false, 4);
        let err = encode_frame(&cmd, &[1, 2], &mut buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadMismatch {
                expected: 4,
                actual: 2
            }
        ));
        assert!(buf.is_empty());

        encode_frame(&cmd, &[0x10, 0, 0, 4], &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x32, 0x10, 0, 0, 4]);
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut buf = BytesMut::from(&[0xB2u8, 0x11, 0x22][..]);
        assert!(decode_frame(&mut buf).is_none());
        buf.extend_from_slice(&[0x33, 0x44, 0x80]);

        let frame = decode_frame(&mut buf).unwrap();
        assert_eq!(frame.command, 0xB2);
        assert_eq!(frame.payload.as_ref(), &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(frame.wire_len(), 5);

        // Trailing zero-payload frame decodes on its own.
        let frame = decode_frame(&mut buf).unwrap();
        assert_eq!(frame.command, 0x80);
        assert!(frame.payload.is_empty());
        assert!(buf.is_empty());
        assert!(decode_frame(&mut buf).is_none());
    }

    #[test]
    fn read_requests_full_and_compact() {
        let mut buf = BytesMut::new();
        encode_read_request(Width::Half, Some(0x2000_0010), &mut buf).unwrap();
        encode_read_request(Width::Half, None, &mut buf).unwrap();
        assert_eq!(
            buf.as_ref(),
            &[0x80 | 0x30 | 0x1, 0x20, 0x00, 0x00, 0x10, 0x80 | 0x04 | 0x1]
        );
    }

    #[test]
    fn write_requests_carry_big_endian_data() {
        let mut buf = BytesMut::new();
        encode_write_request(Width::Word, Some(0x1000_0000), 0x1122_3344, &mut buf).unwrap();
        assert_eq!(
            buf.as_ref(),
            &[0x80 | 0x60 | 0x08 | 0x2, 0x10, 0, 0, 0, 0x11, 0x22, 0x33, 0x44]
        );
        assert_eq!(buf.len(), MAX_REQUEST_FRAME);

        buf.clear();
        encode_write_request(Width::Half, None, 0xBEEF, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x80 | 0x20 | 0x08 | 0x04 | 0x1, 0xBE, 0xEF]);

        buf.clear();
        encode_write_request(Width::Byte, Some(3), 0x1A5, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x80 | 0x40 | 0x08, 0, 0, 0, 3, 0xA5]);
    }

    #[test]
    fn values_follow_width_byte_order() {
        let mut buf = BytesMut::new();
        for width in WIDTHS {
            buf.clear();
            put_value(width, 0xA1B2_C3D4, &mut buf);
            assert_eq!(buf.len(), width.bytes());
            assert_eq!(
                get_value(width, &buf).unwrap(),
                0xA1B2_C3D4 & width.value_mask()
            );
        }
        assert!(get_value(Width::Word, &[1, 2]).is_err());
    }

    #[test]
    fn response_lengths() {
        assert_eq!(response_len(Op::Read, Width::Byte), 2);
        assert_eq!(response_len(Op::Read, Width::Word), 5);
        assert_eq!(response_len(Op::Write, Width::Word), 1);
    }

    #[test]
    fn hex_dump() {
        assert_eq!(hex(&[0x00, 0xAB, 0x7F]), "00AB7F");
    }
}
