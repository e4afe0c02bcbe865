use std::fmt;
use std::io;

use flexlink_engine::EngineError;
use flexlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const BUS_FAULT: i32 = 4;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => FAILURE,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        TransportError::InvalidAddress(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn engine_error(context: &str, err: EngineError) -> CliError {
    match err {
        EngineError::Transport(err) => transport_error(context, err),
        EngineError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        EngineError::BusFault { .. } => CliError::new(BUS_FAULT, format!("{context}: {err}")),
        EngineError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        EngineError::Protocol(_) | EngineError::Closed(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn bus_faults_have_their_own_code() {
        let err = engine_error(
            "read failed",
            EngineError::BusFault {
                index: 3,
                address: 0x2000_000C,
            },
        );
        assert_eq!(err.code, BUS_FAULT);
        assert!(err.message.starts_with("read failed: "));
    }

    #[test]
    fn transport_errors_map_by_kind() {
        let refused = TransportError::Connect {
            addr: "127.0.0.1:1".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(transport_error("open", refused).code, TRANSPORT_ERROR);
        assert_eq!(
            transport_error("open", TransportError::InvalidAddress("[::".into())).code,
            USAGE
        );
        assert_eq!(
            engine_error("read", EngineError::Timeout(Duration::from_secs(1))).code,
            TIMEOUT
        );
    }
}
