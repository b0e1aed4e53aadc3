//! Send helpers (C6): chunking oversized payloads, pooled UTF-8 encoding.

use std::sync::Arc;

use tokio::io::WriteHalf;
use tokio::sync::Mutex as AsyncMutex;

use crate::connection::SizeHint;
use crate::error::WsError;
use crate::frame::{FrameWriter, OpCode};
use crate::pool::BytePool;
use crate::stream::BoxedStream;

/// Payloads up to and including this size go out as a single frame.
const SINGLE_FRAME_LIMIT : usize = 65536;

/// Chunk size used once a payload exceeds `SINGLE_FRAME_LIMIT`, leaving
/// headroom under the 64 KiB mark for frame header/mask overhead.
const CHUNK_SIZE : usize = 65536 - 14;

type SharedWriter = Arc<AsyncMutex<FrameWriter<WriteHalf<BoxedStream>>>>;

/// The send half of a split `Connection`. Cheaply cloneable state lives
/// behind an `Arc`, so sends can be issued concurrently with the receive
/// loop (they share the underlying writer behind a lock).
pub struct MessageSender {
    writer : SharedWriter,
    size_hint : Arc<SizeHint>,
}

impl MessageSender {
    pub(crate) fn new(writer : SharedWriter, size_hint : Arc<SizeHint>) -> Self {
        MessageSender { writer, size_hint }
    }

    /// Sends a binary message, chunked into continuation frames if it
    /// exceeds one frame's practical payload limit.
    pub async fn send_binary(&self, bytes : &[u8]) -> Result<(), WsError> {
        self.size_hint.observe(bytes.len());
        self.send_chunked(OpCode::Binary, bytes).await
    }

    /// Encodes `text` to UTF-8 into a pooled byte buffer, then sends it as
    /// a (possibly chunked) text message. The buffer is released on every
    /// path, including an early write failure.
    pub async fn send_text(&self, text : &str) -> Result<(), WsError> {
        self.size_hint.observe(text.len());
        let pool = BytePool::global();
        let mut buf = pool.rent(text.len());
        buf.as_mut_slice()[.. text.len()].copy_from_slice(text.as_bytes());
        let result = self.send_chunked(OpCode::Text, &buf.as_slice()[.. text.len()]).await;
        pool.release(buf);
        result
    }

    /// Sends a close frame carrying `status` and a UTF-8 `reason`, per
    /// RFC 6455 §5.5.1. Best-effort: callers that only want a clean
    /// shutdown should ignore the result.
    pub async fn send_close(&self, status : u16, reason : &str) -> Result<(), WsError> {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&status.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        let mut writer = self.writer.lock().await;
        writer.write_frame(OpCode::Close, true, &payload).await.map_err(WsError::SendError)
    }

    async fn send_chunked(&self, opcode : OpCode, payload : &[u8]) -> Result<(), WsError> {
        let mut writer = self.writer.lock().await;

        if payload.len() <= SINGLE_FRAME_LIMIT {
            return writer.write_frame(opcode, true, payload).await.map_err(WsError::SendError);
        }

        let mut offset = 0;
        let mut first = true;
        while offset < payload.len() {
            let end = (offset + CHUNK_SIZE).min(payload.len());
            let frame_opcode = if first { opcode } else { OpCode::Continuation };
            let fin = end == payload.len();
            writer.write_frame(frame_opcode, fin, &payload[offset .. end]).await.map_err(WsError::SendError)?;
            offset = end;
            first = false;
        }
        Ok(())
    }
}
