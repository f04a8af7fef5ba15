//! Authenticated connect.
//!
//! The full connector opens the persistent connection, negotiates a
//! version and method from the probed identity, logs in and hands the
//! connection to a new [`Session`].

use crate::config::ConnectConfig;
use crate::error::ConnectError;
use crate::probe::ServerIdentity;
use crate::resolver::Endpoint;
use crate::session::Session;
use crate::transport::{Connection, Transport};
use crate::uam::{uam_name, Credentials, UamHandler, UamRegistry};
use afp_wire::{AfpVersion, SessionOptions, UamMask, VersionSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Highest version both sides speak, bounded by `requested`
pub fn pick_version(
    client: &VersionSet,
    server: &VersionSet,
    requested: Option<AfpVersion>,
) -> Result<AfpVersion, ConnectError> {
    client
        .intersection(server)
        .highest_at_most(requested)
        .ok_or_else(|| ConnectError::VersionMismatch {
            offered: server.clone(),
            requested,
        })
}

/// Opens and authenticates sessions
#[derive(Debug, Clone)]
pub struct FullConnector {
    transport: Arc<dyn Transport>,
    uams: UamRegistry,
    client_versions: VersionSet,
    attention_quantum: u32,
}

impl FullConnector {
    /// Create a connector using the built-in methods
    pub fn new(transport: Arc<dyn Transport>, config: &ConnectConfig) -> Self {
        Self::with_uams(transport, config, UamRegistry::builtin())
    }

    /// Create a connector with a custom method registry
    pub fn with_uams(transport: Arc<dyn Transport>, config: &ConnectConfig, uams: UamRegistry) -> Self {
        Self {
            transport,
            uams,
            client_versions: config.client_versions.clone(),
            attention_quantum: config.attention_quantum,
        }
    }

    /// Connect to `endpoint` and log in
    ///
    /// Empty credentials against a server offering guest access must come
    /// with a guest-only `uam_mask`; anything else is refused before the
    /// connection is opened. The connection is closed on every failure.
    pub async fn connect_and_authenticate(
        &self,
        endpoint: Endpoint,
        identity: &ServerIdentity,
        uam_mask: UamMask,
        credentials: &Credentials,
        requested_version: Option<AfpVersion>,
    ) -> Result<Session, ConnectError> {
        let version = pick_version(&self.client_versions, identity.versions(), requested_version)?;

        if credentials.is_empty()
            && identity.uams().contains(UamMask::NO_USER_AUTHENT)
            && uam_mask != UamMask::NO_USER_AUTHENT
        {
            return Err(ConnectError::auth(
                "none",
                format!("empty credentials must use guest access, not {}", uam_mask),
            ));
        }

        let usable = uam_mask.intersection_with(identity.uams());
        let handler = self.uams.select(usable).ok_or_else(|| {
            ConnectError::auth(
                "none",
                format!(
                    "no usable method (requested {}, server offers {}, supported {})",
                    uam_mask,
                    identity.uams(),
                    self.uams.available()
                ),
            )
        })?;

        debug!(
            "Connecting to {} with AFP {} using {}",
            endpoint,
            version,
            uam_name(handler.uam())
        );
        let mut conn = self.transport.open(&endpoint).await?;

        match self
            .establish(conn.as_mut(), handler.as_ref(), version, credentials)
            .await
        {
            Ok(options) => {
                info!(
                    "Logged in to {} at {} as {:?} ({}, AFP {})",
                    identity.server_name(),
                    endpoint,
                    credentials.username,
                    uam_name(handler.uam()),
                    version
                );
                Ok(Session::new(
                    endpoint,
                    identity.clone(),
                    version,
                    handler.uam(),
                    options.request_quantum,
                    conn,
                ))
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", endpoint, e);
                conn.close().await;
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        conn: &mut dyn Connection,
        handler: &dyn UamHandler,
        version: AfpVersion,
        credentials: &Credentials,
    ) -> Result<SessionOptions, ConnectError> {
        let options = conn.open_session(self.attention_quantum).await?;
        handler.login(conn, version, credentials).await?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{addr, identity, server_info, MockBehavior, MockTransport};

    fn versions(list: &[AfpVersion]) -> VersionSet {
        list.iter().copied().collect()
    }

    #[test]
    fn test_pick_version() {
        let client = versions(&[AfpVersion::V21, AfpVersion::V30, AfpVersion::V32]);
        let server = versions(&[AfpVersion::V22, AfpVersion::V30, AfpVersion::V31, AfpVersion::V32]);

        assert_eq!(pick_version(&client, &server, None).unwrap(), AfpVersion::V32);
        assert_eq!(
            pick_version(&client, &server, Some(AfpVersion::V31)).unwrap(),
            AfpVersion::V30
        );

        let err = pick_version(&client, &server, Some(AfpVersion::V22)).unwrap_err();
        assert!(matches!(err, ConnectError::VersionMismatch { requested: Some(AfpVersion::V22), .. }));

        let old = versions(&[AfpVersion::V11, AfpVersion::V20]);
        assert!(pick_version(&client, &old, None).is_err());
    }

    #[tokio::test]
    async fn test_connect_and_login() {
        let mock = MockTransport::new();
        let info = server_info("Netatalk", Some(4));
        mock.add_server(addr(1, 548), info.clone(), MockBehavior::Ok);
        let connector = FullConnector::new(Arc::new(mock.clone()), &ConnectConfig::default());

        let session = connector
            .connect_and_authenticate(
                Endpoint::new(addr(1, 548)),
                &identity(info),
                UamMask::all(),
                &Credentials::new("alice", "secret"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(session.version(), AfpVersion::V32);
        assert_eq!(session.uam(), UamMask::CLEARTXT_PASSWRD);
        assert_eq!(session.server_quantum(), Some(crate::testing::SERVER_QUANTUM));
        assert_eq!(mock.logins(), 1);
        assert_eq!(mock.closes(), 0);
    }

    #[tokio::test]
    async fn test_failed_login_closes_connection() {
        let mock = MockTransport::new();
        let info = server_info("Netatalk", Some(4));
        mock.add_server(addr(1, 548), info.clone(), MockBehavior::RejectLogin);
        let connector = FullConnector::new(Arc::new(mock.clone()), &ConnectConfig::default());

        let err = connector
            .connect_and_authenticate(
                Endpoint::new(addr(1, 548)),
                &identity(info),
                UamMask::all(),
                &Credentials::new("alice", "wrong"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Authentication { .. }), "{err}");
        assert_eq!(mock.opens(), 1);
        assert_eq!(mock.closes(), 1);
    }

    #[tokio::test]
    async fn test_empty_credentials_require_guest_mask() {
        let mock = MockTransport::new();
        let info = server_info("Netatalk", Some(4));
        mock.add_server(addr(1, 548), info.clone(), MockBehavior::Ok);
        let connector = FullConnector::new(Arc::new(mock.clone()), &ConnectConfig::default());
        let endpoint = Endpoint::new(addr(1, 548));

        let err = connector
            .connect_and_authenticate(endpoint, &identity(info.clone()), UamMask::all(), &Credentials::anonymous(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Authentication { .. }));
        assert_eq!(mock.opens(), 0, "refused before any connection is opened");

        let session = connector
            .connect_and_authenticate(
                endpoint,
                &identity(info),
                UamMask::NO_USER_AUTHENT,
                &Credentials::anonymous(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(session.uam(), UamMask::NO_USER_AUTHENT);
        assert_eq!(mock.login_uams(), vec![UamMask::NO_USER_AUTHENT]);
    }

    #[tokio::test]
    async fn test_no_common_method() {
        let mock = MockTransport::new();
        let mut info = server_info("Macintosh", Some(4));
        info.uams = UamMask::DHX2 | UamMask::DHCAST128;
        mock.add_server(addr(1, 548), info.clone(), MockBehavior::Ok);
        let connector = FullConnector::new(Arc::new(mock.clone()), &ConnectConfig::default());

        let err = connector
            .connect_and_authenticate(
                Endpoint::new(addr(1, 548)),
                &identity(info),
                UamMask::all(),
                &Credentials::new("alice", "secret"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Authentication { ref uam, .. } if uam == "none"));
        assert_eq!(mock.opens(), 0);
    }
}
