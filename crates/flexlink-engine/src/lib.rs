//! Host-side protocol engine for flexlink.
//!
//! An [`Engine`] multiplexes two kinds of traffic over one duplex
//! transport:
//! - master transfers: the host reads and writes target memory, pipelined
//!   in ping-pong batches
//! - slave requests: the target accesses host-emulated peripherals, routed
//!   by a [`SlaveDispatcher`] over a [`PeripheralTable`]
//!
//! One background thread reads the transport. Master responses go to a
//! bounded ring the caller drains in FIFO order; slave requests go to the
//! registered [`SlaveHandler`], inline or through a dispatch queue.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod memory;
pub mod sim;

mod link;
mod reader;
mod transfer;

pub use config::{DispatchMode, EngineConfig};
pub use dispatch::{
    Peripheral, PeripheralMapping, PeripheralTable, SlaveDispatcher, SlaveHandler, SlaveRequest,
};
pub use engine::{BusValue, Engine, HardwareId, HWID_MAGIC, HWID_REGISTER, SYSCTL_BASE};
pub use error::{EngineError, Result};
pub use link::{LinkStats, ReplySink};
pub use memory::WordStore;
pub use sim::{SimConfig, SimTarget, SIM_DEVICE};
