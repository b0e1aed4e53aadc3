//! Message receiver (C5) - the hardest part.
//!
//! A single producer task drains frames off the wire, reassembles
//! fragmented messages into whole ones, and hands them to the application
//! through a bounded channel. The channel's capacity of 1 gives one
//! message of read-ahead (I/O and UTF-8 decode can overlap with the
//! consumer processing the previous message) while still preserving
//! strict per-connection arrival order.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, trace, warn};

use crate::connection::SizeHint;
use crate::frame::{FrameReader, FrameWriter, OpCode};
use crate::pool::{BytePool, CharPool};
use crate::stream::BoxedStream;

/// A minimum amount of free space to keep ahead of the write cursor before
/// reading the next frame into a reassembly buffer.
const MIN_FREE : usize = 4 * 1024;

/// A whole message delivered to the application. Unlike the reassembly
/// buffers behind it, this is a plain owned value (not a pool loan) - the
/// channel hop to the consumer is already an ownership transfer, so
/// handing back a borrowed pool buffer across it would buy nothing but an
/// explicit-release obligation the rest of the API doesn't otherwise have.
#[derive(Debug)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

type SharedWriter = Arc<AsyncMutex<FrameWriter<WriteHalf<BoxedStream>>>>;

/// The receive half of a split `Connection`: a cancellable lazy sequence of
/// whole messages. Iteration ends silently on remote close, local
/// cancellation, or any I/O error - the consumer never sees those as
/// distinct outcomes, matching the "network-induced termination is not an
/// error" contract.
pub struct MessageReceiver {
    rx : mpsc::Receiver<Message>,
    cancel_tx : watch::Sender<bool>,
    remote_addr : SocketAddr,
}

impl MessageReceiver {
    pub(crate) fn new(
        reader : FrameReader<ReadHalf<BoxedStream>>,
        writer : SharedWriter,
        remote_addr : SocketAddr,
        size_hint : Arc<SizeHint>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(run_producer(reader, writer, remote_addr, size_hint, tx, cancel_rx));
        MessageReceiver { rx, cancel_tx, remote_addr }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Pulls the next whole message. Returns `None` once the sequence has
    /// ended, for any reason.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Ends the sequence. Idempotent, and safe to call after the sequence
    /// has already ended on its own.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

impl Drop for MessageReceiver {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
    }
}

impl Stream for MessageReceiver {
    type Item = Message;

    fn poll_next(mut self : Pin<&mut Self>, cx : &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

async fn run_producer(
    mut reader : FrameReader<ReadHalf<BoxedStream>>,
    writer : SharedWriter,
    remote_addr : SocketAddr,
    size_hint : Arc<SizeHint>,
    tx : mpsc::Sender<Message>,
    mut cancel_rx : watch::Receiver<bool>,
) {
    let byte_pool = BytePool::global();
    let char_pool = CharPool::global();

    let mut buf = byte_pool.rent(size_hint.get());
    let mut used = 0usize;
    let mut fragment_kind : Option<OpCode> = None;

    loop {
        if *cancel_rx.borrow() {
            trace!(remote = %remote_addr, "receive sequence cancelled");
            break;
        }

        if buf.capacity() - used < MIN_FREE {
            buf = byte_pool.grow(buf, used);
        }

        let frame = tokio::select! {
            _ = cancel_rx.changed() => break,
            result = reader.read_frame() => match result {
                Ok(frame) => frame,
                Err(err) => {
                    trace!(remote = %remote_addr, error = %err, "receive ended");
                    break;
                }
            },
        };

        match frame.opcode {
            OpCode::Close => {
                debug!(remote = %remote_addr, "received close frame");
                echo_close(&writer, &frame.payload).await;
                break;
            }
            OpCode::Ping | OpCode::Pong => continue,
            _ => {}
        }

        if fragment_kind.is_none() {
            if frame.opcode == OpCode::Continuation {
                warn!(remote = %remote_addr, "continuation frame with no preceding fragment; closing");
                break;
            }
            fragment_kind = Some(frame.opcode);
        }

        if used + frame.payload.len() > buf.capacity() {
            buf = byte_pool.grow(buf, used + frame.payload.len());
        }
        buf.as_mut_slice()[used .. used + frame.payload.len()].copy_from_slice(&frame.payload);
        used += frame.payload.len();

        if !frame.fin {
            continue;
        }

        size_hint.observe(used);
        let kind = fragment_kind.take().expect("fragment_kind set above");

        let message = match kind {
            OpCode::Text => match decode_text(char_pool, &buf.as_slice()[.. used]) {
                Some(text) => Message::Text(text),
                None => {
                    warn!(remote = %remote_addr, "invalid utf-8 in text message; closing");
                    byte_pool.release(buf);
                    return;
                }
            },
            OpCode::Binary => Message::Binary(buf.into_vec(used)),
            _ => unreachable!("control opcodes are handled above"),
        };

        buf = byte_pool.rent(size_hint.get());
        used = 0;

        if tx.send(message).await.is_err() {
            trace!(remote = %remote_addr, "consumer dropped; stopping receive");
            byte_pool.release(buf);
            return;
        }
    }

    byte_pool.release(buf);
}

fn decode_text(char_pool : &CharPool, bytes : &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut chars = char_pool.rent(text.len());
    chars.push_str(text);
    Some(chars.into_string())
}

async fn echo_close(writer : &SharedWriter, remote_payload : &[u8]) {
    let mut writer = writer.lock().await;
    let _ = writer.write_frame(OpCode::Close, true, remote_payload).await;
}
