//! Host-side engine for the flexlink FPGA bus bridge.
//!
//! flexlink lets a host read and write target memory at high throughput
//! and emulate peripherals the target reaches over the same link.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte-stream transports (TCP, Unix sockets)
//! - [`frame`]: command-byte framing, response ring and batch buffers
//! - [`engine`]: pipelined master transfers, slave dispatch, simulated target

/// Re-export transport types.
pub mod transport {
    pub use flexlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use flexlink_frame::*;
}

/// Re-export engine types.
pub mod engine {
    pub use flexlink_engine::*;
}

pub use flexlink_engine::{Engine, EngineConfig, EngineError};
