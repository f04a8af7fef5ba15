//! Hostname resolution into ordered endpoint candidates.

use crate::error::ConnectError;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, error};

/// Address family of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AddressFamily {
    /// IPv4
    Inet,
    /// IPv6
    Inet6,
}

/// One resolved stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    addr: SocketAddr,
}

impl Endpoint {
    /// Wrap a socket address
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Address family
    pub fn family(&self) -> AddressFamily {
        match self.addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Resolve `host:port` into candidates, in resolver order
pub async fn resolve(host: &str, port: u16) -> Result<Vec<Endpoint>, ConnectError> {
    let candidates: Vec<Endpoint> = match tokio::net::lookup_host((host, port)).await {
        Ok(addrs) => addrs.map(Endpoint::new).collect(),
        Err(e) => {
            error!("Could not resolve {}: {}", host, e);
            return Err(ConnectError::Resolution {
                host: host.to_string(),
                port,
                reason: e.to_string(),
            });
        }
    };

    if candidates.is_empty() {
        error!("Could not resolve {}: no addresses", host);
        return Err(ConnectError::Resolution {
            host: host.to_string(),
            port,
            reason: "no addresses".to_string(),
        });
    }

    debug!("Resolved {}:{} to {} candidate(s)", host, port, candidates.len());
    Ok(candidates)
}
