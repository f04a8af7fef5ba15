//! Transport boundary and its DSI-over-TCP implementation.
//!
//! The probe and full connectors only talk to the [`Transport`] and
//! [`Connection`] traits. [`DsiTransport`] is the production implementation;
//! tests substitute an in-memory one.

use crate::config::ConnectConfig;
use crate::error::ConnectError;
use crate::handshake::{exchange, get_status_request, open_session_request};
use crate::resolver::Endpoint;
use afp_wire::{parse_session_options, DsiCommand, Frame, FrameDecoder, SessionOptions};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Reply to an AFP command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// AFP result code (0 on success)
    pub result: i32,
    /// Reply data
    pub data: Bytes,
}

/// An open transport connection to one endpoint
#[async_trait]
pub trait Connection: Send {
    /// Endpoint this connection reaches
    fn peer(&self) -> SocketAddr;

    /// Ask the server to describe itself; returns the raw status payload
    async fn get_status(&mut self) -> Result<Bytes, ConnectError>;

    /// Establish a DSI session
    async fn open_session(&mut self, attention_quantum: u32) -> Result<SessionOptions, ConnectError>;

    /// Issue one AFP command inside the session
    async fn command(&mut self, payload: Bytes) -> Result<CommandReply, ConnectError>;

    /// Release the connection; never fails
    async fn close(&mut self);
}

/// Opens connections to endpoints
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open a connection to `endpoint`
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectError>;
}

/// Connect to a TCP address within `limit`
pub async fn connect_tcp(addr: SocketAddr, limit: Duration) -> Result<TcpStream, ConnectError> {
    match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true).ok();
            Ok(stream)
        }
        Ok(Err(source)) => Err(ConnectError::Connect {
            endpoint: addr,
            source,
        }),
        Err(_) => Err(ConnectError::Timeout {
            endpoint: addr,
            timeout: limit,
        }),
    }
}

/// DSI over TCP
#[derive(Debug, Clone)]
pub struct DsiTransport {
    connect_timeout: Duration,
    reply_timeout: Duration,
    max_payload: usize,
}

impl DsiTransport {
    /// Create a transport using the timeouts and limits from `config`
    pub fn new(config: &ConnectConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            reply_timeout: config.reply_timeout,
            max_payload: config.max_payload,
        }
    }
}

#[async_trait]
impl Transport for DsiTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectError> {
        let stream = connect_tcp(endpoint.addr(), self.connect_timeout).await?;
        debug!("TCP connection established to {}", endpoint);
        Ok(Box::new(DsiConnection::new(
            stream,
            endpoint.addr(),
            self.reply_timeout,
            self.max_payload,
        )))
    }
}

/// One DSI connection
pub struct DsiConnection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    decoder: FrameDecoder,
    read_buf: BytesMut,
    next_request_id: u16,
    reply_timeout: Duration,
    max_payload: usize,
    session_open: bool,
}

impl DsiConnection {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream, peer: SocketAddr, reply_timeout: Duration, max_payload: usize) -> Self {
        Self {
            stream: Some(stream),
            peer,
            decoder: FrameDecoder::with_max_payload(max_payload),
            read_buf: BytesMut::with_capacity(8 * 1024),
            next_request_id: 0,
            reply_timeout,
            max_payload,
            session_open: false,
        }
    }

    fn request_id(&mut self) -> u16 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, ConnectError>>,
    ) -> Result<T, ConnectError> {
        tokio::time::timeout(self.reply_timeout, fut)
            .await
            .unwrap_or(Err(ConnectError::Timeout {
                endpoint: self.peer,
                timeout: self.reply_timeout,
            }))
    }

    async fn request(&mut self, request: Frame) -> Result<Frame, ConnectError> {
        let peer = self.peer;
        let limit = self.reply_timeout;
        let max_payload = self.max_payload;
        let stream = self
            .stream
            .as_mut()
            .ok_or(ConnectError::SessionClosed(peer))?;

        let result = tokio::time::timeout(
            limit,
            exchange(stream, &mut self.decoder, &mut self.read_buf, &request, max_payload),
        )
        .await;

        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                // Framing or socket failure: the stream position is unknown
                warn!("Dropping connection to {} after {}", peer, e);
                self.stream = None;
                self.read_buf.clear();
                self.session_open = false;
                Err(ConnectError::from_exchange(peer, e))
            }
            Err(_) => Err(ConnectError::Timeout {
                endpoint: peer,
                timeout: limit,
            }),
        }
    }
}

#[async_trait]
impl Connection for DsiConnection {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn get_status(&mut self) -> Result<Bytes, ConnectError> {
        let id = self.request_id();
        let reply = self.request(get_status_request(id)).await?;
        trace!("Status reply from {}: {} bytes", self.peer, reply.payload.len());
        Ok(reply.payload)
    }

    async fn open_session(&mut self, attention_quantum: u32) -> Result<SessionOptions, ConnectError> {
        let id = self.request_id();
        let reply = self.request(open_session_request(id, attention_quantum)).await?;
        if reply.header.error_code != 0 {
            return Err(ConnectError::Connect {
                endpoint: self.peer,
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("DSIOpenSession refused with code {}", reply.header.error_code),
                ),
            });
        }
        let options = parse_session_options(&reply.payload).map_err(|source| ConnectError::Protocol {
            endpoint: self.peer,
            source,
        })?;
        self.session_open = true;
        debug!("DSI session open with {} ({:?})", self.peer, options);
        Ok(options)
    }

    async fn command(&mut self, payload: Bytes) -> Result<CommandReply, ConnectError> {
        let id = self.request_id();
        let reply = self
            .request(Frame::request(DsiCommand::Command, id, payload))
            .await?;
        Ok(CommandReply {
            result: reply.header.error_code,
            data: reply.payload,
        })
    }

    async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        if self.session_open {
            let id = self.request_id();
            let bye = Frame::request(DsiCommand::CloseSession, id, Bytes::new());
            if let Ok(bytes) = bye.encode(self.max_payload) {
                let send = self.with_timeout(async {
                    stream.write_all(&bytes).await.map_err(|source| ConnectError::Connect {
                        endpoint: self.peer,
                        source,
                    })
                });
                if let Err(e) = send.await {
                    warn!("Failed to send DSICloseSession to {}: {}", self.peer, e);
                }
            }
            self.session_open = false;
        }

        if let Err(e) = stream.shutdown().await {
            trace!("Shutdown of {} reported {}", self.peer, e);
        }
        debug!("Closed connection to {}", self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spawn_dsi_server, DsiServerBehavior};
    use afp_wire::ServerInfo;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_status_and_session_over_tcp() {
        let info = crate::testing::server_info("Netatalk", Some(1));
        let addr = spawn_dsi_server(info.clone(), DsiServerBehavior::Normal).await;

        let transport = DsiTransport::new(&ConnectConfig::default());
        let mut conn = transport.open(&Endpoint::new(addr)).await.unwrap();
        let status = conn.get_status().await.unwrap();
        assert_eq!(ServerInfo::parse(&status).unwrap(), info);

        let options = conn.open_session(1024).await.unwrap();
        assert_eq!(options.request_quantum, Some(crate::testing::SERVER_QUANTUM));
        conn.close().await;
        conn.close().await;
    }

    #[tokio::test]
    async fn test_refused_is_connect_error() {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect_tcp(addr, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ConnectError::Connect { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let info = crate::testing::server_info("Netatalk", Some(1));
        let addr = spawn_dsi_server(info, DsiServerBehavior::Silent).await;

        let config = ConnectConfig {
            reply_timeout: Duration::from_millis(100),
            ..ConnectConfig::default()
        };
        let mut conn = DsiTransport::new(&config)
            .open(&Endpoint::new(addr))
            .await
            .unwrap();
        let err = conn.get_status().await.unwrap_err();
        assert!(err.is_timeout(), "{err}");
        conn.close().await;
    }

    #[tokio::test]
    async fn test_garbled_reply_drops_connection() {
        let info = crate::testing::server_info("Netatalk", Some(1));
        let addr = spawn_dsi_server(info, DsiServerBehavior::Garbled).await;

        let mut conn = DsiTransport::new(&ConnectConfig::default())
            .open(&Endpoint::new(addr))
            .await
            .unwrap();
        let err = conn.get_status().await.unwrap_err();
        assert!(matches!(err, ConnectError::Protocol { .. }), "{err}");

        let err = conn.command(Bytes::from_static(b"\x14")).await.unwrap_err();
        assert!(matches!(err, ConnectError::SessionClosed(a) if a == addr));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_command_after_close() {
        let info = crate::testing::server_info("Netatalk", Some(1));
        let addr = spawn_dsi_server(info, DsiServerBehavior::Normal).await;

        let mut conn = DsiTransport::new(&ConnectConfig::default())
            .open(&Endpoint::new(addr))
            .await
            .unwrap();
        conn.close().await;
        let err = conn.command(Bytes::from_static(b"\x14")).await.unwrap_err();
        assert!(matches!(err, ConnectError::SessionClosed(a) if a == addr));
    }
}
