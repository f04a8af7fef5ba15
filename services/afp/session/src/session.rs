//! Authenticated server sessions.
//!
//! A [`Session`] owns the DSI connection produced by the full connector
//! together with a copy of the server identity it was negotiated against.
//! Upper layers issue AFP commands through [`Session::command`] and mark
//! their use of the session with dependents tracked by the registry.

use crate::error::ConnectError;
use crate::probe::ServerIdentity;
use crate::resolver::Endpoint;
use crate::transport::{CommandReply, Connection};
use crate::uam::uam_name;
use afp_wire::{AfpVersion, Signature, UamMask};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Server flavor derived from the machine type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ServerType {
    /// Not recognized
    #[default]
    Unknown,
    /// Netatalk on Unix
    Netatalk,
    /// AirPort base station disk
    Airport,
    /// Mac OS file sharing
    Macintosh,
}

impl ServerType {
    /// Classify a machine type string
    pub fn classify(machine_type: &str) -> Self {
        match machine_type {
            "Netatalk" => ServerType::Netatalk,
            "Airport" => ServerType::Airport,
            "Macintosh" => ServerType::Macintosh,
            _ => ServerType::Unknown,
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerType::Unknown => "unknown",
            ServerType::Netatalk => "netatalk",
            ServerType::Airport => "airport",
            ServerType::Macintosh => "macintosh",
        };
        f.write_str(s)
    }
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Session ID
    pub id: u64,
    /// Endpoint the session is connected to
    pub endpoint: Endpoint,
    /// Display name of the server
    pub server_name: String,
    /// Machine type
    pub machine_type: String,
    /// Classification
    pub server_type: ServerType,
    /// Negotiated version
    pub version: AfpVersion,
    /// Method used to log in
    pub uam: String,
    /// Server signature as hex
    pub signature: Option<String>,
    /// Largest request the server accepts
    pub server_quantum: Option<u32>,
    /// Attached dependents
    pub dependents: usize,
    /// Whether the connection is still open
    pub connected: bool,
}

/// An authenticated AFP session
pub struct Session {
    id: u64,
    endpoint: Endpoint,
    identity: ServerIdentity,
    version: AfpVersion,
    uam: UamMask,
    server_quantum: Option<u32>,
    server_type: RwLock<ServerType>,
    dependents: AtomicUsize,
    connected: AtomicBool,
    connection: Mutex<Option<Box<dyn Connection>>>,
}

impl Session {
    /// Wrap an authenticated connection
    pub fn new(
        endpoint: Endpoint,
        identity: ServerIdentity,
        version: AfpVersion,
        uam: UamMask,
        server_quantum: Option<u32>,
        connection: Box<dyn Connection>,
    ) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Session {} created for {} ({}, {})",
            id,
            endpoint,
            version,
            uam_name(uam)
        );
        Self {
            id,
            endpoint,
            identity,
            version,
            uam,
            server_quantum,
            server_type: RwLock::new(ServerType::Unknown),
            dependents: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
            connection: Mutex::new(Some(connection)),
        }
    }

    /// Process-unique session ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint the session is connected to
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Identity captured when the session was negotiated
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Server signature, if the server sent one
    pub fn signature(&self) -> Option<Signature> {
        self.identity.signature()
    }

    /// Negotiated version
    pub fn version(&self) -> AfpVersion {
        self.version
    }

    /// Method used to log in
    pub fn uam(&self) -> UamMask {
        self.uam
    }

    /// Largest request the server accepts, if it said
    pub fn server_quantum(&self) -> Option<u32> {
        self.server_quantum
    }

    /// Current classification
    pub async fn server_type(&self) -> ServerType {
        *self.server_type.read().await
    }

    /// Derive the server type from the machine type and record it
    pub async fn classify(&self) -> ServerType {
        let server_type = ServerType::classify(self.identity.machine_type());
        *self.server_type.write().await = server_type;
        server_type
    }

    /// Number of attached dependents
    pub fn dependents(&self) -> usize {
        self.dependents.load(Ordering::Acquire)
    }

    pub(crate) fn add_dependent(&self) -> usize {
        self.dependents.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn remove_dependent(&self) -> usize {
        let previous = self
            .dependents
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Whether the connection is still open
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Issue an AFP command on the session
    pub async fn command(&self, payload: Bytes) -> Result<CommandReply, ConnectError> {
        let mut guard = self.connection.lock().await;
        let conn = guard
            .as_mut()
            .ok_or(ConnectError::SessionClosed(self.endpoint.addr()))?;
        let reply = conn.command(payload).await;
        if let Err(e) = &reply {
            if e.is_connection_lost() && self.connected.swap(false, Ordering::AcqRel) {
                warn!("Session {} to {} lost its connection: {}", self.id, self.endpoint, e);
            }
        }
        reply
    }

    /// Close the connection; later commands fail with `SessionClosed`
    pub async fn close(&self) {
        let conn = self.connection.lock().await.take();
        self.connected.store(false, Ordering::Release);
        if let Some(mut conn) = conn {
            conn.close().await;
            info!("Session {} to {} closed", self.id, self.endpoint);
        }
    }

    /// Serializable snapshot
    pub async fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            endpoint: self.endpoint,
            server_name: self.identity.server_name(),
            machine_type: self.identity.machine_type().to_string(),
            server_type: self.server_type().await,
            version: self.version,
            uam: uam_name(self.uam).to_string(),
            signature: self.signature().map(|s| s.to_string()),
            server_quantum: self.server_quantum,
            dependents: self.dependents(),
            connected: self.is_connected(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("version", &self.version)
            .field("uam", &uam_name(self.uam))
            .field("signature", &self.signature())
            .field("dependents", &self.dependents())
            .field("connected", &self.is_connected())
            .finish()
    }
}
