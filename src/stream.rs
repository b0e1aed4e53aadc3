//! Type-erased byte stream used to carry a connection through the
//! decorator hook (`UpgradeContext::decorate_stream`). TLS, compression or
//! rate-limiting wrappers all just need to produce something implementing
//! `AsyncRead + AsyncWrite`; boxing lets the decorator be an arbitrary
//! closure instead of a fixed `Plain`/`Tls` enum.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Anything that can stand in for the raw TCP stream after the decorator
/// hook has had a chance to wrap it.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T : AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

impl AsyncRead for Box<dyn AsyncStream> {
    fn poll_read(mut self : Pin<&mut Self>, cx : &mut Context<'_>, buf : &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_read(cx, buf)
    }
}

impl AsyncWrite for Box<dyn AsyncStream> {
    fn poll_write(mut self : Pin<&mut Self>, cx : &mut Context<'_>, buf : &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut **self).poll_write(cx, buf)
    }

    fn poll_flush(mut self : Pin<&mut Self>, cx : &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_flush(cx)
    }

    fn poll_shutdown(mut self : Pin<&mut Self>, cx : &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_shutdown(cx)
    }
}

/// A decorator wraps the raw accepted stream before the handshake is
/// parsed - or, when used from `UpgradeContext`, before the response is
/// written. It is synchronous and fallible, matching the original design's
/// `fn(byte_stream) -> byte_stream` shape plus an error channel.
pub type Decorator = std::sync::Arc<dyn Fn(BoxedStream) -> Result<BoxedStream, Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// The decorator that does nothing - the default for `ServerConfig`.
pub fn identity_decorator() -> Decorator {
    std::sync::Arc::new(|s : BoxedStream| Ok(s))
}

/// Replays `leftover` before resuming reads from `inner`. The handshake
/// reader pulls bytes in fixed-size chunks and can easily read past the
/// `\r\n\r\n` terminator into the first WebSocket frame; those bytes have
/// to go somewhere other than the void once the frame codec takes over.
pub(crate) struct PrefixedStream {
    leftover : Vec<u8>,
    leftover_pos : usize,
    inner : BoxedStream,
}

impl PrefixedStream {
    pub(crate) fn new(leftover : Vec<u8>, inner : BoxedStream) -> Self {
        PrefixedStream { leftover, leftover_pos : 0, inner }
    }
}

impl AsyncRead for PrefixedStream {
    fn poll_read(mut self : Pin<&mut Self>, cx : &mut Context<'_>, buf : &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if self.leftover_pos < self.leftover.len() {
            let remaining = &self.leftover[self.leftover_pos ..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[.. n]);
            self.leftover_pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PrefixedStream {
    fn poll_write(mut self : Pin<&mut Self>, cx : &mut Context<'_>, buf : &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self : Pin<&mut Self>, cx : &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self : Pin<&mut Self>, cx : &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
