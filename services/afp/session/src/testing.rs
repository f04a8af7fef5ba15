//! Test fixtures: server descriptions, an in-memory transport and a
//! localhost DSI server.

use crate::config::ConnectConfig;
use crate::error::ConnectError;
use crate::handshake::{recv_frame, send_frame};
use crate::probe::ServerIdentity;
use crate::resolver::Endpoint;
use crate::session::Session;
use crate::transport::{CommandReply, Connection, Transport};
use afp_wire::{
    encode_open_session_reply, parse_login, result, AfpVersion, DsiCommand, DsiHeader, Frame,
    FrameDecoder, ServerFlags, ServerInfo, SessionOptions, Signature, UamMask,
    DEFAULT_MAX_PAYLOAD_SIZE, FP_LOGIN,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

/// Request quantum every fake server reports
pub(crate) const SERVER_QUANTUM: u32 = 0x0010_0000;

/// 127.0.0.`host`:`port`
pub(crate) fn addr(host: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, host)), port)
}

/// A typical server; `signature` fills all 16 signature bytes
pub(crate) fn server_info(machine_type: &str, signature: Option<u8>) -> ServerInfo {
    let mut flags = ServerFlags::TCP | ServerFlags::RECONNECT;
    flags.set(ServerFlags::SERVER_SIGNATURE, signature.is_some());
    ServerInfo {
        machine_type: machine_type.to_string(),
        versions: [
            AfpVersion::V22,
            AfpVersion::V30,
            AfpVersion::V31,
            AfpVersion::V32,
            AfpVersion::V33,
        ]
        .into_iter()
        .collect(),
        uams: UamMask::NO_USER_AUTHENT | UamMask::CLEARTXT_PASSWRD | UamMask::DHX2,
        flags,
        server_name: "fileserver".to_string(),
        server_name_utf8: None,
        icon: None,
        signature: signature.map(|b| Signature([b; 16])),
    }
}

/// Identity as a probe with default settings would report it
pub(crate) fn identity(info: ServerInfo) -> ServerIdentity {
    ServerIdentity::new(info, ConnectConfig::default().rx_quantum, Duration::from_millis(1))
}

/// Session over a scripted connection, not registered anywhere
pub(crate) fn test_session(peer: SocketAddr, info: ServerInfo) -> Session {
    let mut conn = ScriptedConnection::new(LoginOutcome::Accept);
    conn.peer = peer;
    Session::new(
        Endpoint::new(peer),
        identity(info),
        AfpVersion::V32,
        UamMask::CLEARTXT_PASSWRD,
        Some(SERVER_QUANTUM),
        Box::new(conn),
    )
}

/// How a fake server answers FPLogin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoginOutcome {
    Accept,
    Reject,
}

impl LoginOutcome {
    fn result(self) -> i32 {
        match self {
            LoginOutcome::Accept => result::NO_ERR,
            LoginOutcome::Reject => result::USER_NOT_AUTH,
        }
    }
}

/// Connection that records commands and answers logins from a script
pub(crate) struct ScriptedConnection {
    peer: SocketAddr,
    outcome: LoginOutcome,
    sent: Vec<Bytes>,
}

impl ScriptedConnection {
    pub(crate) fn new(outcome: LoginOutcome) -> Self {
        Self {
            peer: addr(1, 548),
            outcome,
            sent: Vec::new(),
        }
    }

    pub(crate) fn sent(&self) -> &[Bytes] {
        &self.sent
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn get_status(&mut self) -> Result<Bytes, ConnectError> {
        Ok(server_info("Netatalk", Some(1)).encode())
    }

    async fn open_session(&mut self, _attention_quantum: u32) -> Result<SessionOptions, ConnectError> {
        Ok(SessionOptions {
            request_quantum: Some(SERVER_QUANTUM),
            ..SessionOptions::default()
        })
    }

    async fn command(&mut self, payload: Bytes) -> Result<CommandReply, ConnectError> {
        let result = if payload.first() == Some(&FP_LOGIN) {
            self.outcome.result()
        } else {
            result::NO_ERR
        };
        self.sent.push(payload);
        Ok(CommandReply {
            result,
            data: Bytes::new(),
        })
    }

    async fn close(&mut self) {}
}

/// How a mock server behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockBehavior {
    Ok,
    Refuse,
    Timeout,
    RejectLogin,
}

#[derive(Debug, Default)]
struct MockShared {
    servers: Mutex<HashMap<SocketAddr, (ServerInfo, MockBehavior)>>,
    login_delay: Mutex<Duration>,
    login_uams: Mutex<Vec<UamMask>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    logins: AtomicUsize,
    live: AtomicUsize,
}

/// In-memory transport with per-address scripted servers
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_server(&self, addr: SocketAddr, info: ServerInfo, behavior: MockBehavior) {
        self.shared
            .servers
            .lock()
            .unwrap()
            .insert(addr, (info, behavior));
    }

    pub(crate) fn set_behavior(&self, addr: SocketAddr, behavior: MockBehavior) {
        if let Some(entry) = self.shared.servers.lock().unwrap().get_mut(&addr) {
            entry.1 = behavior;
        }
    }

    pub(crate) fn set_login_delay(&self, delay: Duration) {
        *self.shared.login_delay.lock().unwrap() = delay;
    }

    /// Connections opened so far
    pub(crate) fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Explicit closes so far
    pub(crate) fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Completed login exchanges
    pub(crate) fn logins(&self) -> usize {
        self.shared.logins.load(Ordering::SeqCst)
    }

    /// Methods used by each login, in order
    pub(crate) fn login_uams(&self) -> Vec<UamMask> {
        self.shared.login_uams.lock().unwrap().clone()
    }

    /// Connections not yet dropped
    pub(crate) fn live_connections(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectError> {
        let peer = endpoint.addr();
        let server = self.shared.servers.lock().unwrap().get(&peer).cloned();
        let (info, behavior) = match server {
            Some(server) => server,
            None => {
                return Err(ConnectError::Connect {
                    endpoint: peer,
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                })
            }
        };

        match behavior {
            MockBehavior::Refuse => Err(ConnectError::Connect {
                endpoint: peer,
                source: std::io::ErrorKind::ConnectionRefused.into(),
            }),
            MockBehavior::Timeout => Err(ConnectError::Timeout {
                endpoint: peer,
                timeout: Duration::from_secs(5),
            }),
            MockBehavior::Ok | MockBehavior::RejectLogin => {
                self.shared.opens.fetch_add(1, Ordering::SeqCst);
                self.shared.live.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockConnection {
                    peer,
                    info,
                    behavior,
                    shared: self.shared.clone(),
                    closed: false,
                }))
            }
        }
    }
}

struct MockConnection {
    peer: SocketAddr,
    info: ServerInfo,
    behavior: MockBehavior,
    shared: Arc<MockShared>,
    closed: bool,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn get_status(&mut self) -> Result<Bytes, ConnectError> {
        Ok(self.info.encode())
    }

    async fn open_session(&mut self, _attention_quantum: u32) -> Result<SessionOptions, ConnectError> {
        Ok(SessionOptions {
            request_quantum: Some(SERVER_QUANTUM),
            ..SessionOptions::default()
        })
    }

    async fn command(&mut self, payload: Bytes) -> Result<CommandReply, ConnectError> {
        let Ok(login) = parse_login(&payload) else {
            return Ok(CommandReply {
                result: result::NO_ERR,
                data: Bytes::new(),
            });
        };

        self.shared.login_uams.lock().unwrap().push(login.uam);
        let delay = *self.shared.login_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.shared.logins.fetch_add(1, Ordering::SeqCst);

        let result = match self.behavior {
            MockBehavior::RejectLogin => result::USER_NOT_AUTH,
            _ => result::NO_ERR,
        };
        Ok(CommandReply {
            result,
            data: Bytes::new(),
        })
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// How the localhost DSI server behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DsiServerBehavior {
    Normal,
    Silent,
    RejectLogin,
    /// Replies carry an unknown DSI command
    Garbled,
}

/// Serve DSI on an ephemeral localhost port
pub(crate) async fn spawn_dsi_server(info: ServerInfo, behavior: DsiServerBehavior) -> SocketAddr {
    let listener = TcpListener::bind(addr(1, 0)).await.unwrap();
    let local = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_dsi(stream, info.clone(), behavior));
        }
    });
    local
}

async fn serve_dsi(mut stream: TcpStream, info: ServerInfo, behavior: DsiServerBehavior) {
    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::new();

    while let Ok(request) = recv_frame(&mut stream, &mut decoder, &mut buf).await {
        if behavior == DsiServerBehavior::Silent {
            continue;
        }
        if behavior == DsiServerBehavior::Garbled {
            let [hi, lo] = request.header.request_id.to_be_bytes();
            let mut raw = vec![0x01, 0x07, hi, lo, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0];
            raw.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
            if stream.write_all(&raw).await.is_err() {
                return;
            }
            continue;
        }

        let (code, payload) = match request.header.command {
            DsiCommand::GetStatus => (0, info.encode()),
            DsiCommand::OpenSession => (0, encode_open_session_reply(SERVER_QUANTUM)),
            DsiCommand::Command => match parse_login(&request.payload) {
                Ok(_) if behavior == DsiServerBehavior::RejectLogin => {
                    (result::USER_NOT_AUTH, Bytes::new())
                }
                Ok(_) => (result::NO_ERR, Bytes::new()),
                Err(_) => (result::PARAM_ERR, Bytes::new()),
            },
            DsiCommand::CloseSession => return,
            _ => continue,
        };

        let reply = Frame::new(DsiHeader::reply_to(&request.header, code), payload);
        if send_frame(&mut stream, &reply, DEFAULT_MAX_PAYLOAD_SIZE).await.is_err() {
            return;
        }
    }
}
