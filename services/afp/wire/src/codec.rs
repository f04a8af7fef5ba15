//! Encoding helpers for AFP payloads carried in DSI frames.
//!
//! This module provides Pascal-string helpers, DSI OpenSession option
//! encoding, and the FPLogin request builder.

use crate::uam::UamMask;
use crate::version::AfpVersion;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// AFP command code for FPLogin
pub const FP_LOGIN: u8 = 18;

/// OpenSession option: server request quantum (server to client)
pub const OPT_SERVER_REQUEST_QUANTUM: u8 = 0x00;
/// OpenSession option: attention quantum (client to server)
pub const OPT_ATTENTION_QUANTUM: u8 = 0x01;
/// OpenSession option: server replay cache size
pub const OPT_SERVER_REPLAY_CACHE: u8 = 0x02;

/// AFP result codes the connect path cares about
pub mod result {
    /// Success
    pub const NO_ERR: i32 = 0;
    /// Authentication continues with FPLoginCont
    pub const AUTH_CONTINUE: i32 = -5001;
    /// Server does not know the requested UAM
    pub const BAD_UAM: i32 = -5002;
    /// Server does not speak the requested AFP version
    pub const BAD_VERS_NUM: i32 = -5003;
    /// Login refused because the server is shutting down or full
    pub const SERVER_GOING_DOWN: i32 = -5027;
    /// Wrong user name or password
    pub const USER_NOT_AUTH: i32 = -5023;
    /// Parameter error
    pub const PARAM_ERR: i32 = -5019;
}

/// Append a Pascal string (length byte then bytes); input longer than 255 bytes is truncated
pub fn put_pstring(buf: &mut BytesMut, s: &[u8]) {
    let len = s.len().min(255);
    buf.put_u8(len as u8);
    buf.put_slice(&s[..len]);
}

/// Read a Pascal string starting at `offset` within `data`
pub fn read_pstring<'a>(data: &'a [u8], offset: usize, field: &'static str) -> Result<&'a [u8], crate::WireError> {
    let len = *data.get(offset).ok_or(crate::WireError::Offset(field))? as usize;
    data.get(offset + 1..offset + 1 + len)
        .ok_or(crate::WireError::Offset(field))
}

/// Truncate a string to at most `max` bytes on a char boundary
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Encode the client's OpenSession options
pub fn encode_open_session(attention_quantum: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u8(OPT_ATTENTION_QUANTUM);
    buf.put_u8(4);
    buf.put_u32(attention_quantum);
    buf.freeze()
}

/// Encode the server's OpenSession reply options
pub fn encode_open_session_reply(request_quantum: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u8(OPT_SERVER_REQUEST_QUANTUM);
    buf.put_u8(4);
    buf.put_u32(request_quantum);
    buf.freeze()
}

/// Parsed OpenSession options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Largest request the server accepts
    pub request_quantum: Option<u32>,
    /// Attention quantum the client asked for
    pub attention_quantum: Option<u32>,
    /// Server replay cache size
    pub replay_cache_size: Option<u32>,
}

/// Parse OpenSession options; unknown option types are skipped
pub fn parse_session_options(mut data: &[u8]) -> Result<SessionOptions, crate::WireError> {
    let mut options = SessionOptions::default();
    while data.remaining() >= 2 {
        let typ = data.get_u8();
        let len = data.get_u8() as usize;
        if data.remaining() < len {
            return Err(crate::WireError::Malformed);
        }
        let (value, rest) = data.split_at(len);
        data = rest;

        let as_u32 = || (len == 4).then(|| u32::from_be_bytes([value[0], value[1], value[2], value[3]]));
        match typ {
            OPT_SERVER_REQUEST_QUANTUM => options.request_quantum = as_u32(),
            OPT_ATTENTION_QUANTUM => options.attention_quantum = as_u32(),
            OPT_SERVER_REPLAY_CACHE => options.replay_cache_size = as_u32(),
            _ => tracing::trace!("skipping unknown session option {:#04x}", typ),
        }
    }
    Ok(options)
}

/// Builder for FPLogin requests
#[derive(Debug)]
pub struct LoginBuilder {
    version: AfpVersion,
    uam: UamMask,
    auth: BytesMut,
}

impl LoginBuilder {
    /// Start an FPLogin for `version` using the single method `uam`
    pub fn new(version: AfpVersion, uam: UamMask) -> Self {
        Self {
            version,
            uam,
            auth: BytesMut::new(),
        }
    }

    /// Append a Pascal-string user name, padded so the next field is even-aligned
    pub fn user_name(mut self, name: &str) -> Self {
        put_pstring(&mut self.auth, name.as_bytes());
        // command byte + version + uam strings precede the auth block
        if (self.prefix_len() + self.auth.len()) % 2 != 0 {
            self.auth.put_u8(0);
        }
        self
    }

    /// Append a fixed-width, zero-padded field (e.g. an 8-byte cleartext password)
    pub fn fixed(mut self, data: &[u8], width: usize) -> Self {
        let len = data.len().min(width);
        self.auth.put_slice(&data[..len]);
        self.auth.put_bytes(0, width - len);
        self
    }

    fn prefix_len(&self) -> usize {
        let uam_len = self.uam.name().map_or(0, str::len);
        1 + 1 + self.version.wire_name().len() + 1 + uam_len
    }

    /// Build the AFP payload
    pub fn build(self) -> Result<Bytes, crate::WireError> {
        let uam_name = self.uam.name().ok_or(crate::WireError::Text("uam"))?;
        let mut buf = BytesMut::with_capacity(self.prefix_len() + self.auth.len());
        buf.put_u8(FP_LOGIN);
        put_pstring(&mut buf, self.version.wire_name().as_bytes());
        put_pstring(&mut buf, uam_name.as_bytes());
        buf.put_slice(&self.auth);
        Ok(buf.freeze())
    }
}

/// Decoded FPLogin request header (server side and test use)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Version the client asked for
    pub version: AfpVersion,
    /// Method the client picked
    pub uam: UamMask,
    /// Method-specific data
    pub auth: Bytes,
}

/// Parse an FPLogin payload
pub fn parse_login(data: &Bytes) -> Result<LoginRequest, crate::WireError> {
    if data.first() != Some(&FP_LOGIN) {
        return Err(crate::WireError::Malformed);
    }
    let version_raw = read_pstring(data, 1, "login version")?;
    let uam_off = 1 + 1 + version_raw.len();
    let uam_raw = read_pstring(data, uam_off, "login uam")?;
    let auth_off = uam_off + 1 + uam_raw.len();

    let version = std::str::from_utf8(version_raw)
        .ok()
        .and_then(AfpVersion::from_wire_name)
        .ok_or(crate::WireError::Text("login version"))?;
    let uam = std::str::from_utf8(uam_raw)
        .ok()
        .and_then(UamMask::from_uam_name)
        .ok_or(crate::WireError::Text("login uam"))?;

    Ok(LoginRequest {
        version,
        uam,
        auth: data.slice(auth_off..),
    })
}
