//! User authentication methods (UAMs).
//!
//! Each method is a [`UamHandler`] that drives FPLogin over an open DSI
//! session. The full connector asks a [`UamRegistry`] for the strongest
//! handler allowed by the negotiated mask.

use crate::error::ConnectError;
use crate::transport::{CommandReply, Connection};
use afp_wire::result;
use afp_wire::{AfpVersion, LoginBuilder, UamMask, WireError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cleartext passwords occupy a fixed 8-byte field
const CLEARTEXT_PASSWORD_LEN: usize = 8;

/// User name and password supplied by the caller
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Credentials for a named user
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Empty credentials
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Both user name and password are empty
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One authentication method
#[async_trait]
pub trait UamHandler: Send + Sync {
    /// The single mask bit this handler implements
    fn uam(&self) -> UamMask;

    /// Log in on an open DSI session
    async fn login(
        &self,
        conn: &mut dyn Connection,
        version: AfpVersion,
        credentials: &Credentials,
    ) -> Result<(), ConnectError>;
}

/// Display name for a single-method mask
pub fn uam_name(uam: UamMask) -> &'static str {
    uam.name().unwrap_or("unknown")
}

/// Map an FPLogin reply to success or an authentication error
pub fn check_login_reply(uam: UamMask, reply: &CommandReply) -> Result<(), ConnectError> {
    let reason = match reply.result {
        result::NO_ERR => return Ok(()),
        result::USER_NOT_AUTH => "user name or password rejected".to_string(),
        result::BAD_UAM => "server does not accept this method".to_string(),
        result::BAD_VERS_NUM => "server rejected the AFP version".to_string(),
        result::SERVER_GOING_DOWN => "server is shutting down or full".to_string(),
        result::PARAM_ERR => "server reported a parameter error (unknown user?)".to_string(),
        result::AUTH_CONTINUE => "server expected further login exchanges".to_string(),
        code => format!("server returned error {}", code),
    };
    Err(ConnectError::auth(uam_name(uam), reason))
}

fn build_error(conn: &dyn Connection, source: WireError) -> ConnectError {
    ConnectError::Protocol {
        endpoint: conn.peer(),
        source,
    }
}

/// "No User Authent": guest access
#[derive(Debug, Default)]
pub struct NoUserAuthent;

#[async_trait]
impl UamHandler for NoUserAuthent {
    fn uam(&self) -> UamMask {
        UamMask::NO_USER_AUTHENT
    }

    async fn login(
        &self,
        conn: &mut dyn Connection,
        version: AfpVersion,
        _credentials: &Credentials,
    ) -> Result<(), ConnectError> {
        let payload = LoginBuilder::new(version, self.uam())
            .build()
            .map_err(|e| build_error(conn, e))?;
        let reply = conn.command(payload).await?;
        check_login_reply(self.uam(), &reply)
    }
}

/// "Cleartxt Passwrd": user name and an 8-byte password in the clear
#[derive(Debug, Default)]
pub struct CleartextPassword;

#[async_trait]
impl UamHandler for CleartextPassword {
    fn uam(&self) -> UamMask {
        UamMask::CLEARTXT_PASSWRD
    }

    async fn login(
        &self,
        conn: &mut dyn Connection,
        version: AfpVersion,
        credentials: &Credentials,
    ) -> Result<(), ConnectError> {
        if credentials.username.is_empty() {
            return Err(ConnectError::auth(uam_name(self.uam()), "user name required"));
        }
        if credentials.password.len() > CLEARTEXT_PASSWORD_LEN {
            warn!(
                "Password longer than {} bytes is truncated for {}",
                CLEARTEXT_PASSWORD_LEN,
                uam_name(self.uam())
            );
        }

        let payload = LoginBuilder::new(version, self.uam())
            .user_name(&credentials.username)
            .fixed(credentials.password.as_bytes(), CLEARTEXT_PASSWORD_LEN)
            .build()
            .map_err(|e| build_error(conn, e))?;
        let reply = conn.command(payload).await?;
        check_login_reply(self.uam(), &reply)
    }
}

/// Handlers keyed by mask bit
#[derive(Clone, Default)]
pub struct UamRegistry {
    handlers: BTreeMap<u32, Arc<dyn UamHandler>>,
}

static BUILTIN: Lazy<UamRegistry> = Lazy::new(|| {
    let mut registry = UamRegistry::default();
    registry.register(Arc::new(NoUserAuthent));
    registry.register(Arc::new(CleartextPassword));
    registry
});

impl UamRegistry {
    /// Registry holding the built-in methods
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Add or replace a handler
    pub fn register(&mut self, handler: Arc<dyn UamHandler>) {
        let uam = handler.uam();
        debug!("Registering UAM {}", uam_name(uam));
        self.handlers.insert(uam.bits(), handler);
    }

    /// Methods that have a handler
    pub fn available(&self) -> UamMask {
        self.handlers
            .keys()
            .fold(UamMask::empty(), |acc, bits| acc | UamMask::from_bits_retain(*bits))
    }

    /// Strongest handler whose method is in `mask`
    pub fn select(&self, mask: UamMask) -> Option<Arc<dyn UamHandler>> {
        let uam = mask.intersection_with(self.available()).strongest()?;
        self.handlers.get(&uam.bits()).cloned()
    }
}

impl fmt::Debug for UamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UamRegistry")
            .field("available", &self.available().to_string())
            .finish()
    }
}
