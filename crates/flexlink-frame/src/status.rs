//! Status bytes carried by responses.
//!
//! Every response starts with a status byte whose low bit is the failure
//! flag. Slave read replies also encode the width of the returned value in
//! the upper nibble.

use crate::codec::{is_master_frame, payload_len, Width};

/// Transaction succeeded.
pub const STATUS_OK: u8 = 0x00;
/// Transaction failed (bus fault).
pub const STATUS_FAIL: u8 = 0x01;
/// Write flag echoed in slave failure replies.
pub const STATUS_WRITE: u8 = 0x08;

/// Slave read reply carrying one byte.
pub const READ_BYTE: u8 = 0x10;
/// Slave read reply carrying a half-word.
pub const READ_HALF: u8 = 0x20;
/// Slave read reply carrying a word.
pub const READ_WORD: u8 = 0x30;

const READ_CLASS_MASK: u8 = 0x30;

/// True if the status byte reports a failed transaction.
pub fn is_fail(status: u8) -> bool {
    status & STATUS_FAIL != 0
}

/// Failure reply for a slave request.
pub fn slave_fail(write: bool) -> u8 {
    if write {
        STATUS_WRITE | STATUS_FAIL
    } else {
        STATUS_FAIL
    }
}

/// Read-reply class for a width.
pub fn read_class(width: Width) -> u8 {
    match width {
        Width::Byte => READ_BYTE,
        Width::Half => READ_HALF,
        Width::Word => READ_WORD,
    }
}

/// Width of the value following a slave read reply status, if any.
pub fn read_class_width(status: u8) -> Option<Width> {
    match status & READ_CLASS_MASK {
        READ_BYTE => Some(Width::Byte),
        READ_HALF => Some(Width::Half),
        READ_WORD => Some(Width::Word),
        _ => None,
    }
}

/// Wire length of a slave reply, derived from its status byte.
pub fn slave_reply_len(status: u8) -> usize {
    if is_fail(status) {
        return 1;
    }
    1 + read_class_width(status).map_or(0, Width::bytes)
}

/// Wire length of a frame sent by the host, derived from its first byte.
///
/// Master requests are delimited by their size code, slave replies by
/// their status byte.
pub fn host_frame_len(first: u8) -> usize {
    if is_master_frame(first) {
        1 + payload_len(first)
    } else {
        slave_reply_len(first)
    }
}
