//! Process-wide table of authenticated sessions.
//!
//! Sessions are indexed by endpoint and, when the server sent one, by
//! signature. Lookups, inserts, removals and dependent bookkeeping all go
//! through one `RwLock`, which is never held across network I/O.
//!
//! The admission gate serializes connect attempts for the same server:
//! holding the gate for a signature (or an endpoint, for servers without
//! one) across lookup, authenticate and insert makes that sequence atomic
//! per server while unrelated servers proceed in parallel.

use crate::error::ConnectError;
use crate::resolver::Endpoint;
use crate::session::Session;
use afp_wire::Signature;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Key an admission gate is held under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateKey {
    /// Server with a signature
    Signature(Signature),
    /// Server without a signature, identified by address
    Endpoint(Endpoint),
}

#[derive(Default)]
struct Tables {
    by_id: BTreeMap<u64, Arc<Session>>,
    by_endpoint: HashMap<Endpoint, Arc<Session>>,
    by_signature: HashMap<Signature, Arc<Session>>,
}

/// Registry of live sessions
#[derive(Default)]
pub struct SessionRegistry {
    tables: RwLock<Tables>,
    gates: DashMap<GateKey, Arc<Mutex<()>>>,
}

/// Held admission gate; released on drop
pub struct AdmissionGuard<'a> {
    registry: &'a SessionRegistry,
    key: GateKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        // the map entry goes once no other task holds or waits on it
        drop(self.guard.take());
        self.registry
            .gates
            .remove_if(&self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Session connected to the first candidate that has one
    pub async fn find_by_endpoint(&self, candidates: &[Endpoint]) -> Option<Arc<Session>> {
        let tables = self.tables.read().await;
        candidates
            .iter()
            .find_map(|endpoint| tables.by_endpoint.get(endpoint).cloned())
    }

    /// Session for the server with `signature`
    pub async fn find_by_signature(&self, signature: &Signature) -> Option<Arc<Session>> {
        self.tables.read().await.by_signature.get(signature).cloned()
    }

    /// Register a newly authenticated session
    pub async fn insert(&self, session: Arc<Session>) -> Result<(), ConnectError> {
        let mut tables = self.tables.write().await;

        if let Some(signature) = session.signature() {
            if tables.by_signature.contains_key(&signature) {
                warn!("Refusing second session for signature {}", signature);
                return Err(ConnectError::DuplicateSession(signature));
            }
        }
        if tables.by_endpoint.contains_key(&session.endpoint()) {
            warn!("Refusing second session for endpoint {}", session.endpoint());
            return Err(ConnectError::DuplicateEndpoint(session.endpoint().addr()));
        }

        if let Some(signature) = session.signature() {
            tables.by_signature.insert(signature, session.clone());
        }
        tables.by_endpoint.insert(session.endpoint(), session.clone());
        tables.by_id.insert(session.id(), session.clone());

        info!(
            "Registered session {} for {} ({} total)",
            session.id(),
            session.endpoint(),
            tables.by_id.len()
        );
        Ok(())
    }

    /// Unregister a session that has no dependents
    pub async fn remove(&self, session: &Arc<Session>) -> Result<(), ConnectError> {
        let mut tables = self.tables.write().await;

        match tables.by_id.get(&session.id()) {
            Some(registered) if Arc::ptr_eq(registered, session) => {}
            _ => return Err(ConnectError::UnknownSession(session.id())),
        }

        let dependents = session.dependents();
        if dependents > 0 {
            warn!(
                "Not removing session {}: {} dependents attached",
                session.id(),
                dependents
            );
            return Err(ConnectError::SessionBusy {
                id: session.id(),
                dependents,
            });
        }

        tables.by_id.remove(&session.id());
        tables.by_endpoint.remove(&session.endpoint());
        if let Some(signature) = session.signature() {
            tables.by_signature.remove(&signature);
        }

        info!(
            "Removed session {} for {} ({} remaining)",
            session.id(),
            session.endpoint(),
            tables.by_id.len()
        );
        Ok(())
    }

    /// Attach a dependent to a registered session
    pub async fn attach(&self, session: &Arc<Session>) -> Result<usize, ConnectError> {
        let tables = self.tables.write().await;
        if !tables.by_id.contains_key(&session.id()) {
            return Err(ConnectError::UnknownSession(session.id()));
        }
        let count = session.add_dependent();
        debug!("Session {} now has {} dependents", session.id(), count);
        Ok(count)
    }

    /// Detach a dependent; returns the remaining count
    pub async fn detach(&self, session: &Arc<Session>) -> usize {
        let _tables = self.tables.write().await;
        let count = session.remove_dependent();
        debug!("Session {} now has {} dependents", session.id(), count);
        count
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.tables.read().await.by_id.len()
    }

    /// Whether no sessions are registered
    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.by_id.is_empty()
    }

    /// Snapshot of registered sessions, oldest first
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.tables.read().await.by_id.values().cloned().collect()
    }

    /// Wait for exclusive admission for the server identified by `key`
    pub async fn admit(&self, key: GateKey) -> AdmissionGuard<'_> {
        let gate = self
            .gates
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Built before waiting so a cancelled wait still prunes the entry
        let mut admission = AdmissionGuard {
            registry: self,
            key,
            guard: None,
        };
        admission.guard = Some(gate.lock_owned().await);
        admission
    }

    /// Number of gates currently held or awaited
    pub fn pending_admissions(&self) -> usize {
        self.gates.len()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("pending_admissions", &self.gates.len())
            .finish_non_exhaustive()
    }
}
