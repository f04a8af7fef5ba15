//! DSI frame exchange.
//!
//! This module moves single DSI frames over a byte stream and implements
//! the two exchanges that happen before AFP commands flow: DSIGetStatus
//! and DSIOpenSession.

use crate::error::ExchangeError;
use afp_wire::{encode_open_session, DsiCommand, Frame, FrameDecoder};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

/// Write one frame
pub async fn send_frame<W: AsyncWriteExt + Unpin>(
    mut writer: W,
    frame: &Frame,
    max_payload: usize,
) -> Result<(), ExchangeError> {
    let bytes = frame.encode(max_payload)?;
    writer.write_all(&bytes).await?;
    trace!(
        "Sent {:?} request {} ({} bytes)",
        frame.header.command,
        frame.header.request_id,
        bytes.len()
    );
    Ok(())
}

/// Read any frame from the stream
pub async fn recv_frame<R: AsyncReadExt + Unpin>(
    mut reader: R,
    decoder: &mut FrameDecoder,
    buffer: &mut BytesMut,
) -> Result<Frame, ExchangeError> {
    loop {
        // A previous read may already hold a complete frame
        if let Some(frame) = decoder.decode(buffer)? {
            return Ok(frame);
        }

        let bytes_read = reader.read_buf(buffer).await?;
        if bytes_read == 0 {
            return Err(ExchangeError::Eof);
        }

        trace!(
            "Read {} bytes, buffer now has {} bytes",
            bytes_read,
            buffer.len()
        );
    }
}

/// Send a request and wait for the reply carrying the same request ID
///
/// Server-initiated tickles and attentions arriving in between are skipped.
pub async fn exchange<S: AsyncReadExt + AsyncWriteExt + Unpin>(
    stream: &mut S,
    decoder: &mut FrameDecoder,
    buffer: &mut BytesMut,
    request: &Frame,
    max_payload: usize,
) -> Result<Frame, ExchangeError> {
    send_frame(&mut *stream, request, max_payload).await?;

    loop {
        let frame = recv_frame(&mut *stream, decoder, buffer).await?;
        if frame.header.is_reply() && frame.header.request_id == request.header.request_id {
            return Ok(frame);
        }
        debug!(
            "Skipping {:?} frame (request {}) while waiting for reply {}",
            frame.header.command, frame.header.request_id, request.header.request_id
        );
    }
}

/// Build a DSIGetStatus request
pub fn get_status_request(request_id: u16) -> Frame {
    Frame::request(DsiCommand::GetStatus, request_id, Bytes::new())
}

/// Build a DSIOpenSession request
pub fn open_session_request(request_id: u16, attention_quantum: u32) -> Frame {
    Frame::request(
        DsiCommand::OpenSession,
        request_id,
        encode_open_session(attention_quantum),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use afp_wire::{DsiHeader, DEFAULT_MAX_PAYLOAD_SIZE};
    use std::io::Cursor;

    #[tokio::test]
    async fn test_status_request_roundtrip() {
        let mut buffer = Vec::new();
        send_frame(&mut buffer, &get_status_request(9), DEFAULT_MAX_PAYLOAD_SIZE)
            .await
            .unwrap();

        let mut decoder = FrameDecoder::new();
        let mut read_buf = BytesMut::new();
        let frame = recv_frame(Cursor::new(buffer), &mut decoder, &mut read_buf)
            .await
            .unwrap();

        assert_eq!(frame.header.command, DsiCommand::GetStatus);
        assert_eq!(frame.header.request_id, 9);
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_skips_tickles() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let request = open_session_request(1, 1024);

        let server_task = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut buf = BytesMut::new();
            let req = recv_frame(&mut server, &mut decoder, &mut buf).await.unwrap();
            assert_eq!(req.header.command, DsiCommand::OpenSession);

            let tickle = Frame::request(DsiCommand::Tickle, 77, Bytes::new());
            send_frame(&mut server, &tickle, 64).await.unwrap();
            let reply = Frame::new(DsiHeader::reply_to(&req.header, 0), Bytes::new());
            send_frame(&mut server, &reply, 64).await.unwrap();
        });

        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        let reply = exchange(&mut client, &mut decoder, &mut buf, &request, 64)
            .await
            .unwrap();
        assert!(reply.header.is_reply());
        assert_eq!(reply.header.request_id, 1);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let bytes = get_status_request(1).encode(64).unwrap();
        let truncated = bytes[..8].to_vec();

        let mut decoder = FrameDecoder::new();
        let mut read_buf = BytesMut::new();
        let err = recv_frame(Cursor::new(truncated), &mut decoder, &mut read_buf)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Eof));
    }
}
