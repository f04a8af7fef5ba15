//! Connection establishment and session de-duplication for AFP over DSI.
//!
//! This crate turns a host name, port and credentials into a single
//! authenticated session, reusing an existing session when the server is
//! already connected under any of its addresses.
//!
//! ## Components
//!
//! - **Resolver**: host name to ordered endpoint candidates
//! - **Transport**: `Transport`/`Connection` traits, DSI over TCP
//! - **Probe**: throwaway DSIGetStatus exchange yielding a `ServerIdentity`
//! - **UAMs**: authentication methods keyed by mask bit
//! - **Full connector**: version and method negotiation, FPLogin
//! - **Registry**: sessions indexed by endpoint and signature
//! - **Orchestrator**: the connect state machine and its cleanup rules
//!
//! ## Example
//!
//! ```rust,no_run
//! use afp_session::{ConnectConfig, ConnectRequest, Credentials, DsiTransport, Orchestrator, SessionRegistry};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), afp_session::ConnectError> {
//! let config = ConnectConfig::default();
//! let orchestrator = Orchestrator::new(
//!     &config,
//!     Arc::new(DsiTransport::new(&config)),
//!     Arc::new(SessionRegistry::new()),
//! );
//!
//! let request = ConnectRequest::new("fileserver.local", 548)
//!     .with_credentials(Credentials::new("alice", "secret"));
//! let session = orchestrator.connect(&request).await?;
//! println!("Connected with AFP {}", session.version());
//!
//! orchestrator.disconnect(&session).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod handshake;
pub mod orchestrator;
pub mod probe;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod transport;
pub mod uam;

#[cfg(test)]
mod testing;

pub use config::ConnectConfig;
pub use connector::{pick_version, FullConnector};
pub use error::{ConnectError, ExchangeError};
pub use events::{
    ChannelEventNotifier, ClientContext, ConnectEvent, ConnectEventHandler, LogEventHandler,
    ReusePath,
};
pub use orchestrator::{effective_uam_mask, ConnectRequest, ConnectState, Orchestrator};
pub use probe::{ProbeConnector, ProbeResult, ServerIdentity};
pub use registry::{AdmissionGuard, GateKey, SessionRegistry};
pub use resolver::{resolve, AddressFamily, Endpoint};
pub use session::{ServerType, Session, SessionSummary};
pub use transport::{connect_tcp, CommandReply, Connection, DsiConnection, DsiTransport, Transport};
pub use uam::{CleartextPassword, Credentials, NoUserAuthent, UamHandler, UamRegistry};
