//! Connect-path configuration.

use afp_wire::{AfpVersion, UamMask, VersionSet, DEFAULT_MAX_PAYLOAD_SIZE};
use std::time::Duration;

/// Tunables for probing and authenticated connects
#[derive(Clone, Debug)]
pub struct ConnectConfig {
    /// Bound on establishing the TCP connection
    pub connect_timeout: Duration,
    /// Bound on each server reply (status, open session, login)
    pub reply_timeout: Duration,
    /// Attention quantum offered in DSIOpenSession
    pub attention_quantum: u32,
    /// Receive quantum assigned to probed servers
    pub rx_quantum: u32,
    /// Versions this client speaks
    pub client_versions: VersionSet,
    /// Methods tried when a request does not restrict them
    pub default_uam_mask: UamMask,
    /// Largest reply payload accepted
    pub max_payload: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(5),
            attention_quantum: 1024,
            rx_quantum: 128 * 1024, // 128 KiB
            client_versions: [
                AfpVersion::V21,
                AfpVersion::V22,
                AfpVersion::V30,
                AfpVersion::V31,
                AfpVersion::V32,
            ]
            .into_iter()
            .collect(),
            default_uam_mask: UamMask::all(),
            max_payload: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}
