//! Minimal RFC 6455 §5 base frame codec (C8).
//!
//! The rest of the crate treats this module the way the original design
//! treats "the platform WebSocket primitive": a narrow `receive`/`send`
//! collaborator it drives, not something it re-implements the fragmentation
//! or pooling semantics of. Everything about whole-message reassembly,
//! buffer pooling and UTF-8 decoding lives in `receiver.rs` and `send.rs`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Operation codes defined in RFC 6455 §5.2. Reserved codes are rejected
/// outright rather than modelled, since nothing in this crate negotiates
/// extensions that would use them.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_byte(b : u8) -> Option<OpCode> {
        match b {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A single RFC 6455 frame, fully read off the wire (header parsed, payload
/// unmasked if it arrived masked).
#[derive(Debug)]
pub struct RawFrame {
    pub fin : bool,
    pub opcode : OpCode,
    pub payload : Vec<u8>,
}

/// Applies (or removes - XOR is its own inverse) a four-byte masking key to
/// `data` in place, per RFC 6455 §5.3.
pub fn apply_mask(key : [u8; 4], data : &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

async fn read_frame_from<R : AsyncRead + Unpin>(stream : &mut R) -> std::io::Result<RawFrame> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;

    let fin = head[0] & 0b1000_0000 != 0;
    let opcode = OpCode::from_byte(head[0] & 0b0000_1111).ok_or_else(|| bad_frame("unsupported or reserved opcode"))?;
    let masked = head[1] & 0b1000_0000 != 0;
    let mut payload_len = (head[1] & 0b0111_1111) as u64;

    if payload_len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).await?;
        payload_len = u16::from_be_bytes(ext) as u64;
    } else if payload_len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).await?;
        payload_len = u64::from_be_bytes(ext);
    }

    let mask_key = if masked {
        let mut key = [0u8; 4];
        stream.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; payload_len as usize];
    stream.read_exact(&mut payload).await?;
    if let Some(key) = mask_key {
        apply_mask(key, &mut payload);
    }

    Ok(RawFrame { fin, opcode, payload })
}

async fn write_frame_to<W : AsyncWrite + Unpin>(
    stream : &mut W,
    opcode : OpCode,
    fin : bool,
    payload : &[u8],
) -> std::io::Result<()> {
    let mut header = Vec::with_capacity(10);
    header.push((if fin { 0b1000_0000 } else { 0 }) | opcode.to_byte());

    let len = payload.len();
    if len <= 125 {
        header.push(len as u8);
    } else if len <= u16::MAX as usize {
        header.push(126);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        header.push(127);
        header.extend_from_slice(&(len as u64).to_be_bytes());
    }

    stream.write_all(&header).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

fn bad_frame(reason : &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, reason)
}

/// Reads and writes whole frames over an already-upgraded byte stream.
/// Owns no pooling or fragment-reassembly logic; `receiver.rs`/`send.rs`
/// drive it one frame at a time.
pub struct FrameSocket<S> {
    stream : S,
}

impl<S : AsyncRead + AsyncWrite + Unpin> FrameSocket<S> {
    pub fn new(stream : S) -> Self {
        FrameSocket { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Reads exactly one frame, blocking (suspending) until it has arrived
    /// in full. Returns `Err` on I/O error or a malformed header - callers
    /// treat both as end-of-stream per the receive contract.
    pub async fn read_frame(&mut self) -> std::io::Result<RawFrame> {
        read_frame_from(&mut self.stream).await
    }

    /// Writes one unmasked server frame (per RFC 6455, only clients mask).
    pub async fn write_frame(&mut self, opcode : OpCode, fin : bool, payload : &[u8]) -> std::io::Result<()> {
        write_frame_to(&mut self.stream, opcode, fin, payload).await
    }

    /// Splits the socket into an independent read half and write half, so a
    /// receive loop and outbound sends can run from different tasks
    /// without fighting over a single `&mut`.
    pub fn split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (FrameReader::new(read_half), FrameWriter::new(write_half))
    }
}

/// The read half produced by `FrameSocket::split`.
pub struct FrameReader<R> {
    stream : R,
}

impl<R : AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream : R) -> Self {
        FrameReader { stream }
    }

    pub async fn read_frame(&mut self) -> std::io::Result<RawFrame> {
        read_frame_from(&mut self.stream).await
    }
}

/// The write half produced by `FrameSocket::split`.
pub struct FrameWriter<W> {
    stream : W,
}

impl<W : AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stream : W) -> Self {
        FrameWriter { stream }
    }

    pub async fn write_frame(&mut self, opcode : OpCode, fin : bool, payload : &[u8]) -> std::io::Result<()> {
        write_frame_to(&mut self.stream, opcode, fin, payload).await
    }
}
