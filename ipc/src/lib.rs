//! IPC framing for the supervisor/worker channel
//!
//! Messages travel as newline-delimited JSON. Frames are bounded by
//! [`MAX_FRAME_SIZE`] so a misbehaving worker cannot make the supervisor buffer
//! without limit.

pub mod error;

#[cfg(test)]
mod error_tests;

pub use error::{IpcError, Result};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Maximum allowed frame size for IPC messages (64KB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Reads newline-terminated frames from a buffered byte stream
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    max_frame_size: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    /// Create a reader with the default frame limit
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_size(reader, MAX_FRAME_SIZE)
    }

    /// Create a reader with a custom frame limit
    pub fn with_max_frame_size(reader: R, max_frame_size: usize) -> Self {
        Self {
            reader,
            max_frame_size,
        }
    }

    /// Read the next frame, without its line terminator
    ///
    /// Returns `Ok(None)` on a clean end of stream. After an error the stream
    /// position is unspecified and the reader should be discarded.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buffer = Vec::with_capacity(256);
        loop {
            let chunk = self
                .reader
                .fill_buf()
                .await
                .map_err(|e| IpcError::ReceiveFailed(e.to_string()))?;
            if chunk.is_empty() {
                if buffer.is_empty() {
                    return Ok(None);
                }
                return Err(IpcError::ProtocolError(
                    "incomplete frame: stream closed before newline terminator".to_string(),
                ));
            }

            let newline_pos = chunk.iter().position(|b| *b == b'\n');
            let to_copy = newline_pos.map_or(chunk.len(), |idx| idx + 1);
            let next_len = buffer.len() + to_copy;
            if next_len > self.max_frame_size {
                return Err(IpcError::FrameTooLarge {
                    size: next_len,
                    max: self.max_frame_size,
                });
            }

            buffer.extend_from_slice(&chunk[..to_copy]);
            self.reader.consume(to_copy);
            if newline_pos.is_some() {
                break;
            }
        }

        if matches!(buffer.last(), Some(b'\n')) {
            buffer.pop();
            if matches!(buffer.last(), Some(b'\r')) {
                buffer.pop();
            }
        }

        Ok(Some(buffer))
    }

    /// Read and decode the next message, skipping blank lines
    pub async fn next_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            let Some(frame) = self.next_frame().await? else {
                return Ok(None);
            };
            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let message = serde_json::from_slice(&frame)
                .map_err(|e| IpcError::DeserializationFailed(e.to_string()))?;
            return Ok(Some(message));
        }
    }
}

/// Encode `message` as one JSON line and flush it to `writer`
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut data =
        serde_json::to_vec(message).map_err(|e| IpcError::SerializationFailed(e.to_string()))?;
    if data.len() + 1 > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge {
            size: data.len() + 1,
            max: MAX_FRAME_SIZE,
        });
    }
    data.push(b'\n');

    writer
        .write_all(&data)
        .await
        .map_err(|e| IpcError::SendFailed(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| IpcError::SendFailed(e.to_string()))?;
    debug!("Wrote IPC frame of {} bytes", data.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::WorkerMessage;
    use tokio::io::{duplex, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_message_exchange_over_duplex() {
        let (client, server) = duplex(1024);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);

        write_message(&mut client_write, &WorkerMessage::HealthCheck)
            .await
            .unwrap();
        write_message(&mut client_write, &WorkerMessage::Ready)
            .await
            .unwrap();
        drop(client_write);

        let mut reader = FrameReader::new(BufReader::new(server_read));
        let first: Option<WorkerMessage> = reader.next_message().await.unwrap();
        let second: Option<WorkerMessage> = reader.next_message().await.unwrap();
        assert_eq!(first, Some(WorkerMessage::HealthCheck));
        assert_eq!(second, Some(WorkerMessage::Ready));
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let mut reader = FrameReader::new(BufReader::new(&b""[..]));
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_frame_is_protocol_error() {
        let mut reader = FrameReader::new(BufReader::new(&br#"{"type":"ready"}"#[..]));
        match reader.next_frame().await {
            Err(IpcError::ProtocolError(msg)) => assert!(msg.contains("incomplete frame")),
            other => panic!("expected ProtocolError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let data = vec![b'a'; 64];
        let mut reader = FrameReader::with_max_frame_size(BufReader::new(&data[..]), 16);
        assert!(matches!(
            reader.next_frame().await,
            Err(IpcError::FrameTooLarge { max: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_crlf_and_blank_lines() {
        let input = b"\r\n{\"type\":\"shutdown\"}\r\n";
        let mut reader = FrameReader::new(BufReader::new(&input[..]));
        let msg: Option<WorkerMessage> = reader.next_message().await.unwrap();
        assert_eq!(msg, Some(WorkerMessage::Shutdown));
        let end: Option<WorkerMessage> = reader.next_message().await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_garbage_line_is_deserialization_error() {
        let (mut tx, rx) = duplex(256);
        tx.write_all(b"starting up...\n").await.unwrap();
        drop(tx);
        let mut reader = FrameReader::new(BufReader::new(rx));
        let result: Result<Option<WorkerMessage>> = reader.next_message().await;
        assert!(matches!(result, Err(IpcError::DeserializationFailed(_))));
    }
}
