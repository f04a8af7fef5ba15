//! FPGetSrvrInfo reply (DSIGetStatus payload) codec.
//!
//! ```text
//! offset  field
//! 0       u16 machine type offset
//! 2       u16 AFP versions offset
//! 4       u16 UAMs offset
//! 6       u16 volume icon offset (0 if none)
//! 8       u16 flags
//! 10      pstring server name
//! even    u16 signature offset
//!         u16 network addresses offset
//!         u16 directory names offset
//!         u16 UTF-8 server name offset
//! ```
//!
//! Every variable field is copied into a bounded owned buffer; oversized
//! names are truncated, and fixed-size fields of the wrong size are dropped.

use crate::codec::{put_pstring, read_pstring, truncate_str};
use crate::uam::UamMask;
use crate::version::{AfpVersion, VersionSet};
use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Server signature length
pub const SIGNATURE_LEN: usize = 16;
/// Maximum machine type length kept
pub const MACHINE_TYPE_MAX: usize = 32;
/// Maximum server name length kept
pub const SERVER_NAME_MAX: usize = 32;
/// Maximum UTF-8 server name length kept
pub const SERVER_NAME_UTF8_MAX: usize = 255;
/// Volume icon and mask size
pub const ICON_LEN: usize = 256;

bitflags! {
    /// Server capability flags from FPGetSrvrInfo
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ServerFlags: u16 {
        /// FPCopyFile supported
        const COPY_FILE = 1 << 0;
        /// FPChangePassword supported
        const CHANGE_PASSWORD = 1 << 1;
        /// Clients must not store passwords
        const NO_SAVE_PASSWORD = 1 << 2;
        /// Server messages supported
        const SERVER_MESSAGES = 1 << 3;
        /// Reply carries a server signature
        const SERVER_SIGNATURE = 1 << 4;
        /// TCP/IP transport supported
        const TCP = 1 << 5;
        /// Server notifications supported
        const SERVER_NOTIFY = 1 << 6;
        /// Session reconnect supported
        const RECONNECT = 1 << 7;
        /// Open directory services supported
        const DIRECTORY_SERVICES = 1 << 8;
        /// Reply carries a UTF-8 server name
        const UTF8_SERVER_NAME = 1 << 9;
        /// UUIDs supported
        const UUIDS = 1 << 10;
        /// Extended sleep supported
        const EXT_SLEEP = 1 << 11;
        /// Super client
        const SUPER_CLIENT = 1 << 15;
    }
}

/// Fixed-length identity signature of a physical server
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    /// Build from a slice; `None` unless exactly [`SIGNATURE_LEN`] bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Signature)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Decoded FPGetSrvrInfo reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Machine type, e.g. "Netatalk" or "Macintosh"
    pub machine_type: String,
    /// Versions the server offers
    pub versions: VersionSet,
    /// Methods the server offers
    pub uams: UamMask,
    /// Capability flags
    pub flags: ServerFlags,
    /// Server name as sent in the fixed part
    pub server_name: String,
    /// UTF-8 server name, if sent
    pub server_name_utf8: Option<String>,
    /// Volume icon and mask
    #[serde(skip)]
    pub icon: Option<[u8; ICON_LEN]>,
    /// Server signature, present only when the signature flag is set
    pub signature: Option<Signature>,
}

fn read_u16(data: &[u8], offset: usize, field: &'static str) -> Result<usize, crate::WireError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        .ok_or(crate::WireError::Offset(field))
}

fn lossy(raw: &[u8], max: usize) -> String {
    truncate_str(&String::from_utf8_lossy(raw), max)
}

/// Read a counted list of Pascal strings
fn read_string_list<'a>(data: &'a [u8], offset: usize, field: &'static str) -> Result<Vec<&'a [u8]>, crate::WireError> {
    let count = *data.get(offset).ok_or(crate::WireError::Offset(field))? as usize;
    let mut items = Vec::with_capacity(count);
    let mut pos = offset + 1;
    for _ in 0..count {
        let s = read_pstring(data, pos, field)?;
        pos += 1 + s.len();
        items.push(s);
    }
    Ok(items)
}

impl ServerInfo {
    /// Parse a DSIGetStatus reply payload
    pub fn parse(data: &[u8]) -> Result<Self, crate::WireError> {
        let machine_off = read_u16(data, 0, "machine type")?;
        let versions_off = read_u16(data, 2, "versions")?;
        let uams_off = read_u16(data, 4, "uams")?;
        let icon_off = read_u16(data, 6, "icon")?;
        let flags = ServerFlags::from_bits_retain(read_u16(data, 8, "flags")? as u16);

        let name_raw = read_pstring(data, 10, "server name")?;
        let mut pos = 10 + 1 + name_raw.len();
        pos += pos % 2;

        let machine_type = lossy(read_pstring(data, machine_off, "machine type")?, MACHINE_TYPE_MAX);

        let mut versions = VersionSet::new();
        for raw in read_string_list(data, versions_off, "versions")? {
            match std::str::from_utf8(raw).ok().and_then(AfpVersion::from_wire_name) {
                Some(v) => versions.insert(v),
                None => debug!("ignoring unknown AFP version {:?}", String::from_utf8_lossy(raw)),
            }
        }

        let mut uams = UamMask::empty();
        for raw in read_string_list(data, uams_off, "uams")? {
            match std::str::from_utf8(raw).ok().and_then(UamMask::from_uam_name) {
                Some(m) => uams |= m,
                None => debug!("ignoring unknown UAM {:?}", String::from_utf8_lossy(raw)),
            }
        }

        let icon = if icon_off != 0 {
            let raw = data
                .get(icon_off..icon_off + ICON_LEN)
                .ok_or(crate::WireError::Offset("icon"))?;
            <[u8; ICON_LEN]>::try_from(raw).ok()
        } else {
            None
        };

        let signature = if flags.contains(ServerFlags::SERVER_SIGNATURE) {
            let sig_off = read_u16(data, pos, "signature")?;
            let raw = data
                .get(sig_off..sig_off + SIGNATURE_LEN)
                .ok_or(crate::WireError::Offset("signature"))?;
            Signature::from_slice(raw)
        } else {
            None
        };

        let server_name_utf8 = if flags.contains(ServerFlags::UTF8_SERVER_NAME) {
            let utf8_off = read_u16(data, pos + 6, "utf8 name")?;
            let len = read_u16(data, utf8_off, "utf8 name")?;
            let raw = data
                .get(utf8_off + 2..utf8_off + 2 + len)
                .ok_or(crate::WireError::Offset("utf8 name"))?;
            let s = std::str::from_utf8(raw).map_err(|_| crate::WireError::Text("utf8 name"))?;
            Some(truncate_str(s, SERVER_NAME_UTF8_MAX))
        } else {
            None
        };

        Ok(Self {
            machine_type,
            versions,
            uams,
            flags,
            server_name: lossy(name_raw, SERVER_NAME_MAX),
            server_name_utf8,
            icon,
            signature,
        })
    }

    /// Name suitable for display: the UTF-8 name if present, with control characters removed
    pub fn printable_name(&self) -> String {
        self.server_name_utf8
            .as_deref()
            .unwrap_or(&self.server_name)
            .chars()
            .filter(|c| !c.is_control())
            .collect()
    }

    /// Encode as a DSIGetStatus reply payload
    pub fn encode(&self) -> Bytes {
        let mut flags = self.flags;
        flags.set(ServerFlags::SERVER_SIGNATURE, self.signature.is_some());
        flags.set(ServerFlags::UTF8_SERVER_NAME, self.server_name_utf8.is_some());

        // fixed part: five u16s, server name, pad, four u16 offsets
        let mut fixed_len = 10 + 1 + self.server_name.len().min(255);
        fixed_len += fixed_len % 2;
        let tail_start = fixed_len + 8;

        let mut tail = BytesMut::new();
        let machine_off = tail_start + tail.len();
        put_pstring(&mut tail, self.machine_type.as_bytes());

        let versions_off = tail_start + tail.len();
        tail.put_u8(self.versions.len() as u8);
        for v in self.versions.iter() {
            put_pstring(&mut tail, v.wire_name().as_bytes());
        }

        let uams_off = tail_start + tail.len();
        let uam_names: Vec<&str> = self.uams.iter().filter_map(UamMask::name).collect();
        tail.put_u8(uam_names.len() as u8);
        for name in uam_names {
            put_pstring(&mut tail, name.as_bytes());
        }

        let icon_off = match &self.icon {
            Some(icon) => {
                let off = tail_start + tail.len();
                tail.put_slice(icon);
                off
            }
            None => 0,
        };

        let sig_off = match &self.signature {
            Some(sig) => {
                let off = tail_start + tail.len();
                tail.put_slice(&sig.0);
                off
            }
            None => 0,
        };

        let utf8_off = match &self.server_name_utf8 {
            Some(name) => {
                let off = tail_start + tail.len();
                tail.put_u16(name.len() as u16);
                tail.put_slice(name.as_bytes());
                off
            }
            None => 0,
        };

        let mut buf = BytesMut::with_capacity(tail_start + tail.len());
        buf.put_u16(machine_off as u16);
        buf.put_u16(versions_off as u16);
        buf.put_u16(uams_off as u16);
        buf.put_u16(icon_off as u16);
        buf.put_u16(flags.bits());
        put_pstring(&mut buf, self.server_name.as_bytes());
        if buf.len() % 2 != 0 {
            buf.put_u8(0);
        }
        buf.put_u16(sig_off as u16);
        buf.put_u16(0); // network addresses
        buf.put_u16(0); // directory names
        buf.put_u16(utf8_off as u16);
        buf.put_slice(&tail);
        buf.freeze()
    }
}
