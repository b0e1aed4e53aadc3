//! The live, post-handshake connection (C5/C6 data model).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;

use crate::frame::{FrameSocket, OpCode};
use crate::receiver::MessageReceiver;
use crate::send::MessageSender;
use crate::stream::BoxedStream;

/// The largest whole message size observed on a connection so far, shared
/// between its receive and send halves purely as a `rent` sizing hint -
/// not a correctness-bearing value.
#[derive(Default)]
pub(crate) struct SizeHint(AtomicUsize);

impl SizeHint {
    pub(crate) fn observe(&self, len : usize) {
        self.0.fetch_max(len, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// An upgraded WebSocket connection, handed to the application from
/// `UpgradeContext::accept`. Its lifetime spans from accept until the
/// receive side observes close/error or the application drops it.
pub struct Connection {
    socket : FrameSocket<BoxedStream>,
    remote_addr : SocketAddr,
    keep_alive_interval : Option<Duration>,
}

impl Connection {
    pub(crate) fn new(
        socket : FrameSocket<BoxedStream>,
        remote_addr : SocketAddr,
        keep_alive_interval : Option<Duration>,
    ) -> Self {
        Connection { socket, remote_addr, keep_alive_interval }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Splits the connection into an independent receiver and sender. This
    /// is the normal way to consume a `Connection`: applications typically
    /// read messages in one task while writing in another (echo, fan-out
    /// broadcast). Both halves share the same underlying write stream
    /// behind a lock, since the receiver also needs to send a best-effort
    /// close echo and the keep-alive pinger (if configured) needs to write
    /// too.
    pub fn split(self) -> (MessageReceiver, MessageSender) {
        let (reader, writer) = self.socket.split();
        let writer = Arc::new(AsyncMutex::new(writer));
        let size_hint = Arc::new(SizeHint::default());

        if let Some(interval) = self.keep_alive_interval {
            tokio::spawn(keep_alive(writer.clone(), self.remote_addr, interval));
        }

        let receiver = MessageReceiver::new(reader, writer.clone(), self.remote_addr, size_hint.clone());
        let sender = MessageSender::new(writer, size_hint);
        (receiver, sender)
    }
}

async fn keep_alive(
    writer : Arc<AsyncMutex<crate::frame::FrameWriter<tokio::io::WriteHalf<BoxedStream>>>>,
    remote_addr : SocketAddr,
    interval : Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        let mut guard = writer.lock().await;
        if guard.write_frame(OpCode::Ping, true, &[]).await.is_err() {
            trace!(remote = %remote_addr, "keep-alive ping failed; connection is gone");
            break;
        }
    }
}
