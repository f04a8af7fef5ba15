//! Message framing for DSI.
//!
//! A frame is a DSI header followed by `total_len` bytes of payload.

use crate::header::{DsiCommand, DsiHeader, DSI_HEADER_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Default maximum payload accepted by the decoder (1 MiB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Complete DSI frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// DSI header
    pub header: DsiHeader,
    /// Payload following the header
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame; `total_len` is taken from the payload
    pub fn new(mut header: DsiHeader, payload: Bytes) -> Self {
        header.total_len = payload.len() as u32;
        Self { header, payload }
    }

    /// Convenience constructor for a request frame
    pub fn request(command: DsiCommand, request_id: u16, payload: Bytes) -> Self {
        Self::new(DsiHeader::request(command, request_id), payload)
    }

    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        DSI_HEADER_SIZE + self.payload.len()
    }

    /// Encode frame to a contiguous buffer
    pub fn encode(&self, max_payload_size: usize) -> Result<Bytes, crate::WireError> {
        if self.payload.len() > max_payload_size {
            return Err(crate::WireError::Size(self.payload.len()));
        }

        let mut buf = BytesMut::with_capacity(self.encoded_size());
        let mut header = self.header;
        header.total_len = self.payload.len() as u32;
        header.encode(&mut buf);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }
}

/// Frame decoder for parsing incoming frames
#[derive(Debug)]
pub struct FrameDecoder {
    max_payload_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a decoder with an explicit payload bound
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    /// Decode one frame from a buffer
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, crate::WireError> {
        if buf.len() < DSI_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the data length without consuming
        let total_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        if total_len > self.max_payload_size {
            return Err(crate::WireError::Size(total_len));
        }

        if buf.len() < DSI_HEADER_SIZE + total_len {
            return Ok(None);
        }

        // The whole frame leaves the buffer even when its header is rejected,
        // so the next decode starts on a frame boundary
        let mut payload = buf.split_to(DSI_HEADER_SIZE + total_len).freeze();
        let mut header_buf = payload.split_to(DSI_HEADER_SIZE);
        let header = DsiHeader::decode(&mut header_buf)?;
        debug_assert!(!header_buf.has_remaining());

        Ok(Some(Frame { header, payload }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
