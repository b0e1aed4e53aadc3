//! Server façade (C7): configuration, start/stop lifecycle, and per-
//! connection handler dispatch.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::WsError;
use crate::listener::{self, BoxFuture, ConnectionHandler, ListenerHandle};
use crate::stream::{identity_decorator, Decorator};
use crate::upgrade::UpgradeContext;

/// Programmatic configuration for a `Server`. Built with the usual
/// consuming-builder methods; `bind_port` is the only required value.
#[derive(Clone)]
pub struct ServerConfig {
    bind_ip : IpAddr,
    bind_port : u16,
    stream_decorator : Decorator,
    keep_alive_interval : Option<Duration>,
}

impl ServerConfig {
    /// A config listening on `0.0.0.0:<bind_port>` with no stream
    /// decoration and no keep-alive pinger.
    pub fn new(bind_port : u16) -> Self {
        ServerConfig {
            bind_ip : IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port,
            stream_decorator : identity_decorator(),
            keep_alive_interval : None,
        }
    }

    pub fn bind_ip(mut self, ip : IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Installs a decorator run on every accepted stream before the
    /// handshake request is parsed - the hook for TLS, compression, etc.
    pub fn stream_decorator(mut self, decorator : Decorator) -> Self {
        self.stream_decorator = decorator;
        self
    }

    /// Enables a background ping on every connection's send half, at this
    /// cadence, once split. `None` (the default) sends no keep-alive pings.
    pub fn keep_alive_interval(mut self, interval : Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }
}

/// A WebSocket server: binds a TCP listener, accepts connections, drives
/// the upgrade handshake, and dispatches each successfully-upgraded
/// connection to an application-supplied handler.
///
/// `start`/`stop` are idempotent and guarded by a single lock, matching the
/// `Idle -> Listening -> Stopping -> Idle` state machine: a second `start`
/// while already listening is a no-op, and `stop` on an idle server is a
/// no-op.
pub struct Server {
    config : ServerConfig,
    listener : AsyncMutex<Option<ListenerHandle>>,
}

impl Server {
    pub fn new(config : ServerConfig) -> Self {
        Server { config, listener : AsyncMutex::new(None) }
    }

    /// Binds and starts accepting connections. `handler` runs once per
    /// successful handshake, with the `UpgradeContext` as its sole
    /// argument; it is expected to call `accept`/`reject` on it. If it
    /// panics or returns without doing so, the connection is dropped with
    /// an implicit reject (see `UpgradeContext`'s `Drop` impl) - a bad
    /// handler invocation never takes the listener down.
    pub async fn start<F, Fut>(&self, handler : F) -> Result<(), WsError>
    where
        F : Fn(UpgradeContext) -> Fut + Send + Sync + 'static,
        Fut : Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.listener.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let bind_addr = SocketAddr::new(self.config.bind_ip, self.config.bind_port);
        let handler : ConnectionHandler = Arc::new(move |ctx| Box::pin(handler(ctx)) as BoxFuture);
        let handle = listener::spawn(bind_addr, self.config.stream_decorator.clone(), handler, self.config.keep_alive_interval).await?;
        *guard = Some(handle);
        Ok(())
    }

    /// Cancels the accept loop and waits for it (and its in-flight
    /// handshakes) to wind down. A no-op if the server isn't listening.
    pub async fn stop(&self) {
        let mut guard = self.listener.lock().await;
        if let Some(handle) = guard.take() {
            handle.stop().await;
        }
    }

    pub async fn active(&self) -> bool {
        self.listener.lock().await.is_some()
    }

    pub async fn host_ip(&self) -> Option<IpAddr> {
        self.listener.lock().await.as_ref().map(|handle| handle.local_addr().ip())
    }

    pub async fn host_port(&self) -> Option<u16> {
        self.listener.lock().await.as_ref().map(|handle| handle.local_addr().port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameSocket, OpCode};
    use crate::handshake::compute_accept_key;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const REQUEST : &str = "GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

    async fn start_echo_server() -> (Arc<Server>, SocketAddr) {
        let config = ServerConfig::new(0).bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let server = Arc::new(Server::new(config));
        server
            .start(|ctx| async move {
                let conn = match ctx.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let (mut rx, tx) = conn.split();
                while let Some(message) = rx.recv().await {
                    match message {
                        crate::receiver::Message::Text(text) => {
                            let _ = tx.send_text(&text).await;
                        }
                        crate::receiver::Message::Binary(bytes) => {
                            let _ = tx.send_binary(&bytes).await;
                        }
                    }
                }
            })
            .await
            .unwrap();
        let addr = SocketAddr::new(server.host_ip().await.unwrap(), server.host_port().await.unwrap());
        (server, addr)
    }

    #[tokio::test]
    async fn accepts_a_handshake_and_echoes_a_text_message() {
        let (server, addr) = start_echo_server().await;

        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tcp.write_all(REQUEST.as_bytes()).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = tcp.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[.. n]);
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains(&format!("Sec-WebSocket-Accept: {}", compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="))));

        let mut frames = FrameSocket::new(&mut tcp);
        frames.write_frame(OpCode::Text, true, b"hi").await.unwrap();
        let echoed = frames.read_frame().await.unwrap();
        assert_eq!(echoed.opcode, OpCode::Text);
        assert_eq!(echoed.payload, b"hi");

        server.stop().await;
        assert!(!server.active().await);
    }

    #[tokio::test]
    async fn start_is_idempotent_while_listening() {
        let (server, first_addr) = start_echo_server().await;
        server.start(|ctx| async move { drop(ctx); }).await.unwrap();
        let second_addr = SocketAddr::new(server.host_ip().await.unwrap(), server.host_port().await.unwrap());
        assert_eq!(first_addr, second_addr);
        server.stop().await;
    }

    #[tokio::test]
    async fn rejecting_a_handshake_closes_without_upgrading() {
        let config = ServerConfig::new(0).bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let server = Server::new(config);
        server
            .start(|ctx| async move {
                let _ = ctx.reject(Some(403)).await;
            })
            .await
            .unwrap();
        let addr = SocketAddr::new(server.host_ip().await.unwrap(), server.host_port().await.unwrap());

        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tcp.write_all(REQUEST.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = tcp.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[.. n]).starts_with("HTTP/1.1 403 Forbidden\r\n"));

        server.stop().await;
    }
}
