//! Crate-wide error type.
//!
//! Most variants here never reach an application: the accept loop and the
//! handshake pipeline log-and-swallow almost everything (see `server.rs` and
//! `listener.rs`), because a single bad client must never take the listener
//! down. Only `ListenerBindFailed` and `SendError` are meant to be handled by
//! callers.

use std::io;

/// Everything that can go wrong inside this crate.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    /// `TcpListener::bind` failed. Fatal - returned from `Server::start`.
    #[error("failed to bind listener: {0}")]
    ListenerBindFailed(#[source] io::Error),

    /// `listener.accept()` returned an error. Logged and swallowed by the
    /// accept loop; the loop keeps running.
    #[error("transient accept error: {0}")]
    AcceptTransient(#[source] io::Error),

    /// The peer disconnected before the handshake's `\r\n\r\n` arrived.
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,

    /// The request line wasn't `GET`, or `Sec-WebSocket-Key` was missing.
    #[error("malformed upgrade request: {0}")]
    MalformedUpgrade(&'static str),

    /// The application's `decorate_stream` hook returned an error.
    #[error("stream decorator failed: {0}")]
    DecoratorFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The application's per-connection handler panicked or returned early
    /// without accepting/rejecting.
    #[error("connection handler failed: {0}")]
    HandlerFailed(&'static str),

    /// `UpgradeContext::accept`/`reject` called twice, or after a decorator
    /// failure.
    #[error("upgrade context already committed or in a failed state")]
    InvalidState,

    /// A send on an established connection failed. Propagated to the caller.
    #[error("send failed: {0}")]
    SendError(#[source] io::Error),

    /// Underlying I/O error, wrapped for contexts that don't distinguish.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, WsError>;
