//! DSI header processing.
//!
//! Every DSI message starts with a fixed 16-byte header carrying the
//! command, the request ID used to match replies, an error code (replies)
//! or write offset (requests), and the length of the data that follows.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// DSI header size in bytes
pub const DSI_HEADER_SIZE: usize = 16;

/// Default DSI port for AFP over TCP
pub const DSI_DEFAULT_PORT: u16 = 548;

/// Request/reply discriminator
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DsiFlags {
    /// Sent by the client (or by the server for attention/tickle)
    Request = 0x00,
    /// Answer to a request with the same request ID
    Reply = 0x01,
}

impl TryFrom<u8> for DsiFlags {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(DsiFlags::Request),
            0x01 => Ok(DsiFlags::Reply),
            _ => Err(crate::WireError::Flags(value)),
        }
    }
}

/// DSI commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DsiCommand {
    /// Tear down the DSI session
    CloseSession = 0x01,
    /// Carries an AFP command
    Command = 0x02,
    /// Ask for server information without a session
    GetStatus = 0x03,
    /// Establish a DSI session
    OpenSession = 0x04,
    /// Keepalive
    Tickle = 0x05,
    /// AFP write with inline data
    Write = 0x06,
    /// Server-initiated attention
    Attention = 0x08,
}

impl TryFrom<u8> for DsiCommand {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(DsiCommand::CloseSession),
            0x02 => Ok(DsiCommand::Command),
            0x03 => Ok(DsiCommand::GetStatus),
            0x04 => Ok(DsiCommand::OpenSession),
            0x05 => Ok(DsiCommand::Tickle),
            0x06 => Ok(DsiCommand::Write),
            0x08 => Ok(DsiCommand::Attention),
            _ => Err(crate::WireError::Command(value)),
        }
    }
}

/// DSI header (16 bytes, big-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsiHeader {
    /// Request or reply
    pub flags: DsiFlags,
    /// Command
    pub command: DsiCommand,
    /// Matches a reply to its request
    pub request_id: u16,
    /// AFP result code in replies, data offset in write requests
    pub error_code: i32,
    /// Number of bytes following the header
    pub total_len: u32,
    /// Reserved field (must be zero)
    pub reserved: u32,
}

impl DsiHeader {
    /// Create a request header
    pub fn request(command: DsiCommand, request_id: u16) -> Self {
        Self {
            flags: DsiFlags::Request,
            command,
            request_id,
            error_code: 0,
            total_len: 0,
            reserved: 0,
        }
    }

    /// Create a reply header answering `request`
    pub fn reply_to(request: &DsiHeader, error_code: i32) -> Self {
        Self {
            flags: DsiFlags::Reply,
            command: request.command,
            request_id: request.request_id,
            error_code,
            total_len: 0,
            reserved: 0,
        }
    }

    /// Whether this header is a reply
    pub fn is_reply(&self) -> bool {
        self.flags == DsiFlags::Reply
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags as u8);
        buf.put_u8(self.command as u8);
        buf.put_u16(self.request_id);
        buf.put_i32(self.error_code);
        buf.put_u32(self.total_len);
        buf.put_u32(self.reserved);
    }

    /// Decode the header from bytes (big-endian)
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < DSI_HEADER_SIZE {
            return Err(crate::WireError::Incomplete);
        }

        let flags = DsiFlags::try_from(buf.get_u8())?;
        let command = DsiCommand::try_from(buf.get_u8())?;
        let request_id = buf.get_u16();
        let error_code = buf.get_i32();
        let total_len = buf.get_u32();
        let reserved = buf.get_u32();

        if reserved != 0 {
            return Err(crate::WireError::Reserved);
        }

        Ok(Self {
            flags,
            command,
            request_id,
            error_code,
            total_len,
            reserved,
        })
    }
}
