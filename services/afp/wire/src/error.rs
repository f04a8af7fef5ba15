//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Incomplete frame (need more data)
    #[error("incomplete frame")]
    Incomplete,

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Reserved bits nonzero
    #[error("reserved bits nonzero")]
    Reserved,

    /// Unknown DSI command
    #[error("unknown command {0}")]
    Command(u8),

    /// Unknown DSI flags byte
    #[error("unknown flags {0:#04x}")]
    Flags(u8),

    /// String field is not valid for its encoding
    #[error("invalid string in {0}")]
    Text(&'static str),

    /// Field points outside the message
    #[error("offset out of range for {0}")]
    Offset(&'static str),

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,
}
