//! Connection orchestration.
//!
//! [`Orchestrator::connect`] is the single entry point that turns a host,
//! port and credentials into a registered, authenticated [`Session`]:
//!
//! ```text
//! Resolving -> ProbingOrReusing -> Authenticating -> Classifying -> Ready
//!      \               \                  \                \
//!       +---------------+------------------+----------------+--> Error
//! ```
//!
//! An existing session is reused when one of the resolved addresses
//! already has one, or when the probed server signature does. Only
//! sessions created by the failing call are ever removed on error, and
//! never while a dependent is attached.

use crate::config::ConnectConfig;
use crate::connector::FullConnector;
use crate::error::ConnectError;
use crate::events::{ClientContext, ConnectEventHandler, LogEventHandler, ReusePath};
use crate::probe::{ProbeConnector, ProbeResult};
use crate::registry::{GateKey, SessionRegistry};
use crate::resolver::resolve;
use crate::session::Session;
use crate::transport::Transport;
use crate::uam::Credentials;
use afp_wire::{AfpVersion, UamMask};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stage of a connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// Resolving the host name
    Resolving,
    /// Looking for an existing session, probing the server
    ProbingOrReusing,
    /// Opening and authenticating a new session
    Authenticating,
    /// Deriving the server type
    Classifying,
    /// Session handed to the caller
    Ready,
    /// Attempt failed
    Error,
}

impl fmt::Display for ConnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Parameters of one connect attempt
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Host name or address literal
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Highest version to negotiate; `None` for the highest available
    pub requested_version: Option<AfpVersion>,
    /// User credentials; empty for guest access
    pub credentials: Credentials,
    /// Acceptable methods; `None` for the configured default
    pub uam_mask: Option<UamMask>,
    /// Caller identity for event reporting
    pub context: ClientContext,
}

impl ConnectRequest {
    /// Guest request for `host:port` with no version bound
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            context: ClientContext::new(format!("{}:{}", host, port)),
            host,
            port,
            requested_version: None,
            credentials: Credentials::anonymous(),
            uam_mask: None,
        }
    }

    /// Set credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Bound the negotiated version
    pub fn with_version(mut self, version: AfpVersion) -> Self {
        self.requested_version = Some(version);
        self
    }

    /// Restrict acceptable methods
    pub fn with_uam_mask(mut self, mask: UamMask) -> Self {
        self.uam_mask = Some(mask);
        self
    }

    /// Set the reporting context
    pub fn with_context(mut self, context: ClientContext) -> Self {
        self.context = context;
        self
    }
}

/// Mask handed to the full connector
///
/// Empty credentials against a server that offers guest access are
/// restricted to guest access; otherwise the requested mask is used as is.
pub fn effective_uam_mask(requested: UamMask, server: UamMask, credentials: &Credentials) -> UamMask {
    if credentials.is_empty() && server.contains(UamMask::NO_USER_AUTHENT) {
        UamMask::NO_USER_AUTHENT
    } else {
        requested
    }
}

/// Entry point for producing de-duplicated, authenticated sessions
#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    probe: ProbeConnector,
    connector: FullConnector,
    events: Arc<dyn ConnectEventHandler>,
    default_uam_mask: UamMask,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in methods and log-only events
    pub fn new(config: &ConnectConfig, transport: Arc<dyn Transport>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            probe: ProbeConnector::new(transport.clone(), config),
            connector: FullConnector::new(transport, config),
            events: Arc::new(LogEventHandler),
            default_uam_mask: config.default_uam_mask,
        }
    }

    /// Report events to `events`
    pub fn with_events(mut self, events: Arc<dyn ConnectEventHandler>) -> Self {
        self.events = events;
        self
    }

    /// Registry this orchestrator inserts into
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Resolve and probe without authenticating
    pub async fn probe_only(&self, host: &str, port: u16) -> Result<ProbeResult, ConnectError> {
        let candidates = resolve(host, port).await?;
        self.probe.probe(&candidates).await
    }

    /// Produce a ready session for `request`
    pub async fn connect(&self, request: &ConnectRequest) -> Result<Arc<Session>, ConnectError> {
        let mut state = ConnectState::Resolving;
        debug!("[{}] {} {}:{}", request.context, state, request.host, request.port);

        let result = self.run(request, &mut state).await;
        if let Err(e) = &result {
            warn!("[{}] {} -> {}: {}", request.context, state, ConnectState::Error, e);
            self.events.notify_connect_failed(
                &request.context,
                &request.host,
                request.port,
                e.to_string(),
                e.is_timeout(),
            );
        }
        result
    }

    /// Remove `session` from the registry and close it
    ///
    /// Fails with `SessionBusy` while dependents are attached.
    pub async fn disconnect(&self, session: &Arc<Session>) -> Result<(), ConnectError> {
        self.registry.remove(session).await?;
        session.close().await;
        Ok(())
    }

    fn advance(&self, request: &ConnectRequest, state: &mut ConnectState, next: ConnectState) {
        debug!("[{}] {} -> {}", request.context, state, next);
        *state = next;
    }

    async fn run(&self, request: &ConnectRequest, state: &mut ConnectState) -> Result<Arc<Session>, ConnectError> {
        let candidates = resolve(&request.host, request.port).await?;

        self.advance(request, state, ConnectState::ProbingOrReusing);
        if let Some(session) = self.registry.find_by_endpoint(&candidates).await {
            self.events
                .notify_session_reused(&request.context, session.id(), ReusePath::Endpoint);
            return self.finish(request, state, session, false).await;
        }

        let ProbeResult { endpoint, identity } = self.probe.probe(&candidates).await?;

        let signature = identity.signature();
        let key = match signature {
            Some(signature) => GateKey::Signature(signature),
            None => GateKey::Endpoint(endpoint),
        };
        let admission = self.registry.admit(key).await;

        let existing = match &signature {
            Some(signature) => self.registry.find_by_signature(signature).await,
            None => self.registry.find_by_endpoint(&[endpoint]).await,
        };
        if let Some(session) = existing {
            drop(admission);
            let path = if signature.is_some() {
                ReusePath::Signature
            } else {
                ReusePath::Endpoint
            };
            self.events
                .notify_session_reused(&request.context, session.id(), path);
            return self.finish(request, state, session, false).await;
        }

        self.advance(request, state, ConnectState::Authenticating);
        let requested = request.uam_mask.unwrap_or(self.default_uam_mask);
        let uam_mask = effective_uam_mask(requested, identity.uams(), &request.credentials);
        if uam_mask != requested {
            info!("[{}] Empty credentials, restricting to guest access", request.context);
        }

        let session = Arc::new(
            self.connector
                .connect_and_authenticate(
                    endpoint,
                    &identity,
                    uam_mask,
                    &request.credentials,
                    request.requested_version,
                )
                .await?,
        );

        if let Err(e) = self.registry.insert(session.clone()).await {
            session.close().await;
            return Err(e);
        }
        drop(admission);
        self.events
            .notify_session_added(&request.context, session.id(), endpoint.addr());

        self.finish(request, state, session, true).await
    }

    async fn finish(
        &self,
        request: &ConnectRequest,
        state: &mut ConnectState,
        session: Arc<Session>,
        created: bool,
    ) -> Result<Arc<Session>, ConnectError> {
        self.advance(request, state, ConnectState::Classifying);
        let server_type = session.classify().await;
        debug!("[{}] Session {} is {}", request.context, session.id(), server_type);

        if !session.is_connected() {
            if created {
                self.discard(request, &session, "closed before use").await;
            }
            return Err(ConnectError::SessionClosed(session.endpoint().addr()));
        }

        self.advance(request, state, ConnectState::Ready);
        info!(
            "[{}] Session {} ready: {} at {} (AFP {})",
            request.context,
            session.id(),
            session.identity().server_name(),
            session.endpoint(),
            session.version()
        );
        Ok(session)
    }

    /// Drop a session this attempt created, unless something now depends on it
    async fn discard(&self, request: &ConnectRequest, session: &Arc<Session>, reason: &str) {
        match self.registry.remove(session).await {
            Ok(()) => {
                session.close().await;
                self.events
                    .notify_session_removed(&request.context, session.id(), reason.to_string());
            }
            Err(e) => warn!("[{}] Keeping session {}: {}", request.context, session.id(), e),
        }
    }
}
