//! Connect event reporting.
//!
//! The orchestrator reports failures and session changes to a
//! [`ConnectEventHandler`] along with the caller's [`ClientContext`].
//! Handlers must not block; both implementations here return immediately.

use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Opaque handle identifying the caller an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClientContext {
    /// Unique ID
    pub id: Uuid,
    /// Free-form label, e.g. the mount point
    pub label: String,
}

impl ClientContext {
    /// Create a context with a fresh ID
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
        }
    }
}

impl fmt::Display for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// How an existing session was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReusePath {
    /// A candidate address already had a session
    Endpoint,
    /// The probed signature already had a session
    Signature,
}

/// Sink for connect events
pub trait ConnectEventHandler: Send + Sync + fmt::Debug {
    /// A connect attempt ended in an error
    fn notify_connect_failed(&self, context: &ClientContext, host: &str, port: u16, reason: String, timeout: bool);
    /// A new session was registered
    fn notify_session_added(&self, context: &ClientContext, session_id: u64, endpoint: SocketAddr);
    /// An existing session was handed out again
    fn notify_session_reused(&self, context: &ClientContext, session_id: u64, path: ReusePath);
    /// A session was removed from the registry
    fn notify_session_removed(&self, context: &ClientContext, session_id: u64, reason: String);
}

/// Handler that writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventHandler;

impl ConnectEventHandler for LogEventHandler {
    fn notify_connect_failed(&self, context: &ClientContext, host: &str, port: u16, reason: String, timeout: bool) {
        if timeout {
            error!("[{}] Timed out connecting to {}:{}: {}", context, host, port, reason);
        } else {
            error!("[{}] Could not connect to {}:{}: {}", context, host, port, reason);
        }
    }

    fn notify_session_added(&self, context: &ClientContext, session_id: u64, endpoint: SocketAddr) {
        info!("[{}] New session {} to {}", context, session_id, endpoint);
    }

    fn notify_session_reused(&self, context: &ClientContext, session_id: u64, path: ReusePath) {
        info!("[{}] Reusing session {} (matched by {:?})", context, session_id, path);
    }

    fn notify_session_removed(&self, context: &ClientContext, session_id: u64, reason: String) {
        warn!("[{}] Session {} removed: {}", context, session_id, reason);
    }
}

/// Event as delivered by [`ChannelEventNotifier`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectEvent {
    /// Connect attempt failed
    ConnectFailed {
        /// Caller
        context: Uuid,
        /// Host as given
        host: String,
        /// Port as given
        port: u16,
        /// Error text
        reason: String,
        /// Whether the failure was a timeout
        timeout: bool,
    },
    /// Session registered
    SessionAdded {
        /// Caller
        context: Uuid,
        /// Session ID
        session_id: u64,
        /// Connected endpoint
        endpoint: SocketAddr,
    },
    /// Session reused
    SessionReused {
        /// Caller
        context: Uuid,
        /// Session ID
        session_id: u64,
        /// Lookup that found it
        path: ReusePath,
    },
    /// Session removed
    SessionRemoved {
        /// Caller
        context: Uuid,
        /// Session ID
        session_id: u64,
        /// Why
        reason: String,
    },
}

/// Handler that forwards events to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventNotifier {
    event_tx: mpsc::UnboundedSender<ConnectEvent>,
}

impl ChannelEventNotifier {
    /// Create a notifier and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self { event_tx }, event_rx)
    }

    fn send(&self, event: ConnectEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Connect event dropped: receiver closed");
        }
    }
}

impl ConnectEventHandler for ChannelEventNotifier {
    fn notify_connect_failed(&self, context: &ClientContext, host: &str, port: u16, reason: String, timeout: bool) {
        self.send(ConnectEvent::ConnectFailed {
            context: context.id,
            host: host.to_string(),
            port,
            reason,
            timeout,
        });
    }

    fn notify_session_added(&self, context: &ClientContext, session_id: u64, endpoint: SocketAddr) {
        self.send(ConnectEvent::SessionAdded {
            context: context.id,
            session_id,
            endpoint,
        });
    }

    fn notify_session_reused(&self, context: &ClientContext, session_id: u64, path: ReusePath) {
        self.send(ConnectEvent::SessionReused {
            context: context.id,
            session_id,
            path,
        });
    }

    fn notify_session_removed(&self, context: &ClientContext, session_id: u64, reason: String) {
        self.send(ConnectEvent::SessionRemoved {
            context: context.id,
            session_id,
            reason,
        });
    }
}
