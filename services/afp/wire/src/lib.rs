//! DSI framing, server-info codec, and AFP capability sets.
//!
//! This crate provides the low-level wire protocol pieces the AFP client
//! needs to establish sessions: the DSI header and frame decoder, the
//! FPGetSrvrInfo reply codec, the FPLogin request builder, and explicit
//! version/UAM capability sets used during negotiation.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8  flags            | 0 = request, 1 = reply     |
//! +----------------------+----------------------------+
//! | u8  command          | DSI command                |
//! +----------------------+----------------------------+
//! | u16 request_id       | matches replies to requests|
//! +----------------------+----------------------------+
//! | i32 error_code       | AFP result / write offset  |
//! +----------------------+----------------------------+
//! | u32 total_len        | length of bytes that follow|
//! +----------------------+----------------------------+
//! | u32 reserved         | zero                       |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod status;
pub mod uam;
pub mod version;

// Re-export main types
pub use codec::{
    encode_open_session, encode_open_session_reply, parse_login, parse_session_options,
    put_pstring, read_pstring, result, LoginBuilder, LoginRequest, SessionOptions, FP_LOGIN,
};
pub use error::WireError;
pub use frame::{Frame, FrameDecoder, DEFAULT_MAX_PAYLOAD_SIZE};
pub use header::{DsiCommand, DsiFlags, DsiHeader, DSI_DEFAULT_PORT, DSI_HEADER_SIZE};
pub use status::{
    ServerFlags, ServerInfo, Signature, ICON_LEN, MACHINE_TYPE_MAX, SERVER_NAME_MAX,
    SERVER_NAME_UTF8_MAX, SIGNATURE_LEN,
};
pub use uam::UamMask;
pub use version::{AfpVersion, VersionSet};
