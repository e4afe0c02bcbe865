use std::net::{Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::stream::StreamTransport;

/// Port the target bridge listens on when the device id omits one.
pub const DEFAULT_PORT: u16 = 7878;

/// A parsed TCP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Parse a device id into a TCP endpoint.
///
/// Accepted forms:
/// - `192.168.1.10`, `192.168.1.10:9000`, `bridge.local:9000`
/// - `[fe80::1]:9000`, `fe80::1` (default port)
/// - `fe80::1:9000` when the prefix alone is a valid IPv6 address and the
///   full string is not
pub fn parse_endpoint(id: &str) -> Result<Endpoint> {
    let id = id.trim();
    if id.is_empty() {
        return Err(TransportError::InvalidAddress(id.to_string()));
    }

    if let Some(rest) = id.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| TransportError::InvalidAddress(id.to_string()))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(id, port)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(TransportError::InvalidAddress(id.to_string())),
        };
        return Ok(Endpoint {
            host: host.to_string(),
            port,
        });
    }

    if id.parse::<Ipv6Addr>().is_ok() {
        return Ok(Endpoint {
            host: id.to_string(),
            port: DEFAULT_PORT,
        });
    }

    match id.rsplit_once(':') {
        None => Ok(Endpoint {
            host: id.to_string(),
            port: DEFAULT_PORT,
        }),
        Some((host, port)) => {
            let colons = id.matches(':').count();
            if colons > 1 && host.parse::<Ipv6Addr>().is_err() {
                return Err(TransportError::InvalidAddress(id.to_string()));
            }
            if host.is_empty() {
                return Err(TransportError::InvalidAddress(id.to_string()));
            }
            Ok(Endpoint {
                host: host.to_string(),
                port: parse_port(id, port)?,
            })
        }
    }
}

fn parse_port(id: &str, port: &str) -> Result<u16> {
    let parsed = if let Some(hex) = port.strip_prefix("0x") {
        u16::from_str_radix(hex, 16).ok()
    } else {
        port.parse::<u16>().ok()
    };
    parsed.ok_or_else(|| TransportError::InvalidAddress(id.to_string()))
}

/// Connect to a target bridge over TCP (blocking).
pub fn connect(id: &str, config: &TransportConfig) -> Result<StreamTransport> {
    let endpoint = parse_endpoint(id)?;
    let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect {
            addr: id.to_string(),
            source: e,
        })?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        debug!(%addr, "connecting");
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => {
                info!(%addr, "connected to target over tcp");
                return StreamTransport::from_tcp(stream, config);
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(TransportError::Connect {
        addr: id.to_string(),
        source: last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "host resolved to no addresses",
            )
        }),
    })
}
