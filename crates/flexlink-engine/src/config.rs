use std::time::Duration;

use flexlink_frame::{MAX_PAYLOAD, MAX_REQUEST_FRAME};
use flexlink_transport::{ChunkHints, TransportConfig};

use crate::error::{EngineError, Result};

/// Default pipeline chunk bound in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
/// Default response ring capacity in bytes.
pub const DEFAULT_RESPONSE_CAPACITY: usize = 64 * 1024;
/// Default deadline for a response to arrive.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default deadline for a stalled physical write.
pub const DEFAULT_WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest response a one-byte request can produce: status plus a word.
const WORST_RESPONSE_PER_REQUEST_BYTE: usize = 5;

/// How slave frames reach the registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Run the handler on the reader thread. Handler latency delays every
    /// frame behind it, including master responses.
    #[default]
    Inline,
    /// Forward frames in arrival order to one dispatch thread through a
    /// bounded queue of `depth` frames.
    Queued { depth: usize },
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for one pipeline batch (one physical write).
    pub chunk_size: usize,
    /// Response ring capacity. Raised automatically so two in-flight
    /// batches of worst-case responses always fit.
    pub response_capacity: usize,
    /// Deadline for each awaited response. `None` waits forever.
    pub response_timeout: Option<Duration>,
    /// How long a physical write may make no progress.
    pub write_stall_timeout: Duration,
    /// Slave dispatch mode.
    pub dispatch: DispatchMode,
    /// Target register that gates slave traffic, written on
    /// [`slave_enable`](crate::Engine::slave_enable).
    pub slave_enable_register: Option<u32>,
    /// Transport settings used by [`Engine::open`](crate::Engine::open).
    pub transport: TransportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
            response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
            write_stall_timeout: DEFAULT_WRITE_STALL_TIMEOUT,
            dispatch: DispatchMode::Inline,
            slave_enable_register: None,
            transport: TransportConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Negotiate the batch bound with the transport's write hint.
    ///
    /// The bound must hold the largest request frame.
    pub fn chunk_bound(&self, hints: ChunkHints) -> Result<usize> {
        let bound = match hints.write {
            Some(hint) => self.chunk_size.min(hint),
            None => self.chunk_size,
        };
        if bound < MAX_REQUEST_FRAME {
            return Err(EngineError::Config(format!(
                "chunk bound {bound} is smaller than the largest request frame ({MAX_REQUEST_FRAME} bytes)"
            )));
        }
        Ok(bound)
    }

    /// Ring capacity for a given chunk bound.
    pub fn ring_capacity(&self, chunk_bound: usize) -> usize {
        let in_flight = 2 * chunk_bound * WORST_RESPONSE_PER_REQUEST_BYTE;
        self.response_capacity.max(in_flight + 1 + MAX_PAYLOAD)
    }

    /// Validate settings that do not depend on the transport.
    pub fn validate(&self) -> Result<()> {
        if let DispatchMode::Queued { depth: 0 } = self.dispatch {
            return Err(EngineError::Config(
                "queued dispatch needs a depth of at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
