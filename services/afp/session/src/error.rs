//! Connect-path error types.

use afp_wire::{AfpVersion, Signature, VersionSet, WireError};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by resolution, probing, authentication and the registry
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Name resolution produced no usable address
    #[error("could not resolve {host}:{port}: {reason}")]
    Resolution {
        /// Host as given by the caller
        host: String,
        /// Port as given by the caller
        port: u16,
        /// Resolver message
        reason: String,
    },

    /// Transport-level refusal, reset or unreachable host
    #[error("could not connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint that failed
        endpoint: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// No response within the configured bound
    #[error("no response from {endpoint} within {timeout:?}")]
    Timeout {
        /// Endpoint that did not answer
        endpoint: SocketAddr,
        /// Bound that expired
        timeout: Duration,
    },

    /// Server reply could not be decoded
    #[error("protocol error from {endpoint}: {source}")]
    Protocol {
        /// Endpoint that sent the reply
        endpoint: SocketAddr,
        /// Decoding failure
        #[source]
        source: WireError,
    },

    /// No protocol version both sides speak
    #[error("no common AFP version (server offers {offered}, requested {requested:?})")]
    VersionMismatch {
        /// Versions the server offered
        offered: VersionSet,
        /// Upper bound the caller asked for
        requested: Option<AfpVersion>,
    },

    /// No usable method, or the server rejected the credentials
    #[error("authentication failed ({uam}): {reason}")]
    Authentication {
        /// Method name, or "none" when none could be picked
        uam: String,
        /// What went wrong
        reason: String,
    },

    /// A session with this signature is already registered
    #[error("a session for server signature {0} is already registered")]
    DuplicateSession(Signature),

    /// A session for this endpoint is already registered
    #[error("a session for endpoint {0} is already registered")]
    DuplicateEndpoint(SocketAddr),

    /// Removal refused because mounts still depend on the session
    #[error("session {id} still has {dependents} dependents")]
    SessionBusy {
        /// Session ID
        id: u64,
        /// Attached dependents at the time of the request
        dependents: usize,
    },

    /// Operation on a session that is not in the registry
    #[error("session {0} is not registered")]
    UnknownSession(u64),

    /// The session's connection has been closed
    #[error("session to {0} is closed")]
    SessionClosed(SocketAddr),
}

impl ConnectError {
    /// Whether this error is a response timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectError::Timeout { .. })
    }

    /// Whether another candidate endpoint is worth trying after this error
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(self, ConnectError::Connect { .. } | ConnectError::Timeout { .. })
    }

    /// Whether the connection this error came from can no longer be used
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ConnectError::Connect { .. } | ConnectError::Protocol { .. } | ConnectError::SessionClosed(_)
        )
    }

    /// Build an authentication error
    pub fn auth(uam: impl Into<String>, reason: impl Into<String>) -> Self {
        ConnectError::Authentication {
            uam: uam.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_exchange(endpoint: SocketAddr, err: ExchangeError) -> Self {
        match err {
            ExchangeError::Io(source) => ConnectError::Connect { endpoint, source },
            ExchangeError::Eof => ConnectError::Connect {
                endpoint,
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                ),
            },
            ExchangeError::Wire(source) => ConnectError::Protocol { endpoint, source },
        }
    }
}

/// Failure while moving a single frame over a stream
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Socket error
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Frame could not be encoded or decoded
    #[error(transparent)]
    Wire(#[from] WireError),
    /// Peer closed the stream mid-exchange
    #[error("EOF while reading frame")]
    Eof,
}
