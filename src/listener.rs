//! Listener / accept loop (C4).
//!
//! State machine `Idle -> Listening -> Stopping -> Idle` lives one level up
//! in `Server` (server.rs), which owns at most one `ListenerHandle` at a
//! time; this module is just the loop itself plus its handshake fan-out.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{trace, warn};

use crate::error::WsError;
use crate::handshake;
use crate::stream::{BoxedStream, Decorator, PrefixedStream};
use crate::upgrade::UpgradeContext;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub(crate) type ConnectionHandler = Arc<dyn Fn(UpgradeContext) -> BoxFuture + Send + Sync>;

/// A running accept loop. Dropping this without calling `stop` leaves the
/// loop (and its listening socket) running in the background - `Server`
/// always calls `stop` explicitly instead.
pub(crate) struct ListenerHandle {
    cancel_tx : watch::Sender<bool>,
    accept_task : JoinHandle<()>,
    local_addr : SocketAddr,
}

impl ListenerHandle {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancels the accept loop and waits for it (and every handshake it had
    /// in flight) to wind down.
    pub(crate) async fn stop(self) {
        let _ = self.cancel_tx.send(true);
        let _ = self.accept_task.await;
    }
}

/// Binds `bind_addr` and starts the accept loop on its own task.
pub(crate) async fn spawn(
    bind_addr : SocketAddr,
    decorator : Decorator,
    handler : ConnectionHandler,
    keep_alive_interval : Option<Duration>,
) -> Result<ListenerHandle, WsError> {
    let tcp_listener = TcpListener::bind(bind_addr).await.map_err(WsError::ListenerBindFailed)?;
    let local_addr = tcp_listener.local_addr().map_err(WsError::ListenerBindFailed)?;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let accept_task = tokio::spawn(accept_loop(tcp_listener, decorator, handler, keep_alive_interval, cancel_rx));
    Ok(ListenerHandle { cancel_tx, accept_task, local_addr })
}

async fn accept_loop(
    tcp_listener : TcpListener,
    decorator : Decorator,
    handler : ConnectionHandler,
    keep_alive_interval : Option<Duration>,
    mut cancel_rx : watch::Receiver<bool>,
) {
    let mut handshakes = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => break,
            accepted = tcp_listener.accept() => {
                match accepted {
                    Ok((stream, remote_addr)) => {
                        handshakes.spawn(handle_one(stream, remote_addr, decorator.clone(), handler.clone(), keep_alive_interval));
                    }
                    Err(err) => {
                        // Transient OS-level accept failures (too many open
                        // files, connection reset before accept finished)
                        // must never take the listener down.
                        warn!(error = %WsError::AcceptTransient(err), "accept error, continuing");
                    }
                }
            }
            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
        }
    }

    handshakes.shutdown().await;
}

async fn handle_one(
    stream : TcpStream,
    remote_addr : SocketAddr,
    decorator : Decorator,
    handler : ConnectionHandler,
    keep_alive_interval : Option<Duration>,
) {
    let _ = stream.set_nodelay(true);
    let boxed : BoxedStream = Box::new(stream);

    let mut boxed = match decorator(boxed) {
        Ok(decorated) => decorated,
        Err(err) => {
            warn!(remote = %remote_addr, error = %err, "stream decorator failed during accept");
            return;
        }
    };

    let (head, leftover) = match handshake::read_request(&mut boxed).await {
        Ok(parsed) => parsed,
        Err(err) => {
            trace!(remote = %remote_addr, error = %err, "handshake failed before a connection handler ran");
            return;
        }
    };
    let boxed : BoxedStream = if leftover.is_empty() { boxed } else { Box::new(PrefixedStream::new(leftover, boxed)) };

    let ctx = UpgradeContext::new(head, remote_addr, boxed, keep_alive_interval);
    handler(ctx).await;
}
