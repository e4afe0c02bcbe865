//! Wire framing and buffering for the flexlink host engine.
//!
//! Every frame starts with a command byte:
//! - bit 7 selects master (host-initiated) or slave (target-initiated) traffic
//! - bits 6:4 index the payload length table `{0,1,2,4,5,6,8,16}`
//! - bit 3 is the write flag, bit 2 the auto-increment flag
//! - bits 1:0 carry the access width (`bytes >> 1`)
//!
//! There is no terminator or checksum. A frame is complete once the number
//! of payload bytes its command byte declares has arrived.
//!
//! Besides the codec this crate holds the [`ResponseChannel`] ring that
//! carries master responses to callers, the ping-pong [`PendingBatch`]
//! buffers used by pipelined transfers, and the [`FrameReader`] /
//! [`FrameWriter`] adapters over a [`flexlink_transport::Transport`].

pub mod batch;
pub mod codec;
pub mod error;
pub mod reader;
pub mod ring;
pub mod status;
pub mod writer;

pub use batch::{PendingBatch, PingPong};
pub use codec::{
    decode_frame, encode_frame, encode_read_request, encode_write_request, is_master_frame,
    payload_code, payload_len, response_len, Command, Direction, Op, RawFrame, Width,
    MAX_PAYLOAD, MAX_REQUEST_FRAME, PAYLOAD_SIZES,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use ring::ResponseChannel;
pub use writer::{FrameWriter, WriteReport};
