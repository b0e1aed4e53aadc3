//! A lightweight WebSocket server: a TCP accept loop, a hand-rolled
//! RFC 6455 upgrade handshake, and a pooled-buffer message stream.
//!
//! The typical shape of an application built on this crate:
//!
//! ```no_run
//! use wharf::{Server, ServerConfig};
//!
//! # async fn run() -> Result<(), wharf::WsError> {
//! let server = Server::new(ServerConfig::new(9001));
//! server.start(|ctx| async move {
//!     let Ok(conn) = ctx.accept().await else { return };
//!     let (mut rx, tx) = conn.split();
//!     while let Some(message) = rx.recv().await {
//!         match message {
//!             wharf::Message::Text(text) => { let _ = tx.send_text(&text).await; }
//!             wharf::Message::Binary(bytes) => { let _ = tx.send_binary(&bytes).await; }
//!         }
//!     }
//! }).await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod frame;
mod handshake;
mod listener;
mod pool;
mod receiver;
mod send;
mod server;
mod stream;
mod upgrade;

pub use connection::Connection;
pub use error::{Result, WsError};
pub use handshake::HeaderMap;
pub use receiver::{Message, MessageReceiver};
pub use send::MessageSender;
pub use server::{Server, ServerConfig};
pub use stream::{identity_decorator, AsyncStream, BoxedStream, Decorator};
pub use upgrade::{UpgradeContext, UpgradeRequest, UpgradeResponse};
