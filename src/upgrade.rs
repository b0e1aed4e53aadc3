//! The upgrade context (C3): what the application's connection handler
//! actually gets its hands on.

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::WsError;
use crate::frame::FrameSocket;
use crate::handshake::{self, HeaderMap, RequestHead};
use crate::stream::{BoxedStream, Decorator};

/// The immutable request half of an upgrade. The raw text and header map
/// are exposed verbatim; policy beyond "has a `Sec-WebSocket-Key`" belongs
/// to the application.
#[derive(Debug)]
pub struct UpgradeRequest {
    pub raw : String,
    pub method : String,
    pub path : String,
    pub headers : HeaderMap,
    pub remote_addr : SocketAddr,
}

impl UpgradeRequest {
    fn from_head(head : RequestHead, remote_addr : SocketAddr) -> Self {
        UpgradeRequest { raw : head.raw, method : head.method, path : head.path, headers : head.headers, remote_addr }
    }
}

/// The mutable response half. `401 Unauthorized` by default since that's
/// the status an unhandled connection is implicitly rejected with.
#[derive(Debug)]
pub struct UpgradeResponse {
    status : u16,
    headers : HeaderMap,
}

impl UpgradeResponse {
    fn new() -> Self {
        UpgradeResponse { status : 401, headers : HeaderMap::new() }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_header(&mut self, name : impl Into<String>, value : impl Into<String>) {
        self.headers.insert(name, value);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum State {
    Open,
    Committed,
    Failed,
}

/// A single-use capability handed to the application's connection handler.
/// Exactly one of `accept`/`reject` must be called; if the handler returns
/// without calling either, `Server` (see `server.rs`) closes the
/// connection with an implicit reject at whatever status was last set.
pub struct UpgradeContext {
    pub request : UpgradeRequest,
    pub response : UpgradeResponse,
    stream : Option<BoxedStream>,
    state : State,
    decorated : bool,
    keep_alive_interval : Option<std::time::Duration>,
}

impl UpgradeContext {
    pub(crate) fn new(
        head : RequestHead,
        remote_addr : SocketAddr,
        stream : BoxedStream,
        keep_alive_interval : Option<std::time::Duration>,
    ) -> Self {
        UpgradeContext {
            request : UpgradeRequest::from_head(head, remote_addr),
            response : UpgradeResponse::new(),
            stream : Some(stream),
            state : State::Open,
            decorated : false,
            keep_alive_interval,
        }
    }

    /// Replaces the underlying stream, e.g. to layer TLS or compression on
    /// top of the raw TCP bytes. May be called at most once, and only
    /// before `accept`/`reject`. If `decorator` fails the context moves to
    /// a terminal `Failed` state; any later `accept`/`reject` call returns
    /// `InvalidState`.
    pub fn decorate_stream(&mut self, decorator : &Decorator) -> Result<(), WsError> {
        if self.state != State::Open || self.decorated {
            return Err(WsError::InvalidState);
        }
        self.decorated = true;
        let stream = self.stream.take().expect("stream present while Open");
        match decorator(stream) {
            Ok(decorated) => {
                self.stream = Some(decorated);
                Ok(())
            }
            Err(source) => {
                self.state = State::Failed;
                Err(WsError::DecoratorFailed(source))
            }
        }
    }

    /// Commits the response as `101 Switching Protocols`, writes the
    /// success response, and returns a live `Connection`.
    pub async fn accept(mut self) -> Result<Connection, WsError> {
        if self.state != State::Open {
            return Err(WsError::InvalidState);
        }
        let mut stream = self.stream.take().expect("stream present while Open");

        let client_key = self
            .request
            .headers
            .get("sec-websocket-key")
            .ok_or(WsError::MalformedUpgrade("missing Sec-WebSocket-Key"))?
            .to_string();

        self.response.status = 101;
        let response_text = handshake::format_accept_response(&client_key, &self.response.headers);
        stream.write_all(response_text.as_bytes()).await?;
        stream.flush().await?;
        self.state = State::Committed;

        debug!(remote = %self.request.remote_addr, "connection upgraded");
        Ok(Connection::new(FrameSocket::new(stream), self.request.remote_addr, self.keep_alive_interval))
    }

    /// Commits the response at `status` (default `401`), writes the
    /// rejection and closes the TCP connection.
    pub async fn reject(mut self, status : Option<u16>) -> Result<(), WsError> {
        if self.state != State::Open {
            return Err(WsError::InvalidState);
        }
        let status = status.unwrap_or(401);
        self.response.status = status;
        self.close_with_reject(status).await
    }

    async fn close_with_reject(&mut self, status : u16) -> Result<(), WsError> {
        let mut stream = self.stream.take().expect("stream present while Open");
        let response_text = handshake::format_reject_response(status, &self.response.headers);
        let write_result = stream.write_all(response_text.as_bytes()).await;
        let _ = stream.shutdown().await;
        self.state = State::Committed;
        write_result.map_err(WsError::from)
    }
}

/// If the application handler returns without calling `accept`/`reject`,
/// the context is dropped while still `Open`. Rather than require the
/// listener to notice that and call back in, the implicit reject is fired
/// from here: a background task writes the rejection at whatever status
/// was last set and closes the socket.
impl Drop for UpgradeContext {
    fn drop(&mut self) {
        if self.state != State::Open {
            return;
        }
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let status = self.response.status;
        let headers = std::mem::take(&mut self.response.headers);
        let remote_addr = self.request.remote_addr;
        tokio::spawn(async move {
            warn!(remote = %remote_addr, status, "connection handler returned without accept/reject; rejecting implicitly");
            let response_text = handshake::format_reject_response(status, &headers);
            let _ = stream.write_all(response_text.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}
