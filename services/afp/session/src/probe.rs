//! Unauthenticated server probe.
//!
//! A probe opens a throwaway connection, asks the server to describe
//! itself with DSIGetStatus and closes the connection again. The result
//! tells the orchestrator which versions and methods to negotiate and
//! whether the server is already connected under another address.

use crate::config::ConnectConfig;
use crate::error::ConnectError;
use crate::resolver::Endpoint;
use crate::transport::Transport;
use afp_wire::{ServerInfo, Signature, UamMask, VersionSet};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a probe learned about a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerIdentity {
    info: ServerInfo,
    rx_quantum: u32,
    tx_delay: Duration,
}

impl ServerIdentity {
    /// Build an identity from a decoded status reply
    pub fn new(info: ServerInfo, rx_quantum: u32, tx_delay: Duration) -> Self {
        Self {
            info,
            rx_quantum,
            tx_delay,
        }
    }

    /// Decoded status reply
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Server signature, when the server sends one
    pub fn signature(&self) -> Option<Signature> {
        self.info.signature
    }

    /// Versions the server offers
    pub fn versions(&self) -> &VersionSet {
        &self.info.versions
    }

    /// Methods the server offers
    pub fn uams(&self) -> UamMask {
        self.info.uams
    }

    /// Machine type string
    pub fn machine_type(&self) -> &str {
        &self.info.machine_type
    }

    /// Display name
    pub fn server_name(&self) -> String {
        self.info.printable_name()
    }

    /// Receive quantum assigned to the server
    pub fn rx_quantum(&self) -> u32 {
        self.rx_quantum
    }

    /// Round-trip time of the status request
    pub fn tx_delay(&self) -> Duration {
        self.tx_delay
    }

    /// Whether the server offers at least one version in `versions`
    pub fn speaks_any(&self, versions: &VersionSet) -> bool {
        !self.info.versions.intersection(versions).is_empty()
    }
}

/// Outcome of a successful probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    /// Candidate that answered
    pub endpoint: Endpoint,
    /// What it said about itself
    pub identity: ServerIdentity,
}

/// Issues status probes through a [`Transport`]
#[derive(Debug, Clone)]
pub struct ProbeConnector {
    transport: Arc<dyn Transport>,
    rx_quantum: u32,
}

impl ProbeConnector {
    /// Create a probe connector
    pub fn new(transport: Arc<dyn Transport>, config: &ConnectConfig) -> Self {
        Self {
            transport,
            rx_quantum: config.rx_quantum,
        }
    }

    /// Probe candidates in order until one answers
    ///
    /// Connect failures and timeouts move on to the next candidate; the
    /// last such failure is returned when every candidate fails. Any other
    /// error ends the probe immediately.
    pub async fn probe(&self, candidates: &[Endpoint]) -> Result<ProbeResult, ConnectError> {
        let mut last_error = None;

        for endpoint in candidates {
            match self.probe_endpoint(endpoint).await {
                Ok(identity) => {
                    return Ok(ProbeResult {
                        endpoint: *endpoint,
                        identity,
                    })
                }
                Err(e) if e.is_endpoint_failure() => {
                    warn!("Probe of {} failed: {}", endpoint, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ConnectError::Resolution {
            host: String::new(),
            port: 0,
            reason: "no candidate endpoints".to_string(),
        }))
    }

    /// Probe a single endpoint
    pub async fn probe_endpoint(&self, endpoint: &Endpoint) -> Result<ServerIdentity, ConnectError> {
        debug!("Probing {}", endpoint);
        let mut conn = self.transport.open(endpoint).await?;

        let started = Instant::now();
        let status = conn.get_status().await;
        let tx_delay = started.elapsed();
        conn.close().await;

        let info = ServerInfo::parse(&status?).map_err(|source| ConnectError::Protocol {
            endpoint: endpoint.addr(),
            source,
        })?;

        info!(
            "Probed {} at {}: {} (versions {}, UAMs {}, signature {})",
            info.printable_name(),
            endpoint,
            info.machine_type,
            info.versions,
            info.uams,
            info.signature
                .map_or_else(|| "none".to_string(), |s| s.to_string())
        );

        Ok(ServerIdentity::new(info, self.rx_quantum, tx_delay))
    }
}
