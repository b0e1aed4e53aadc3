//! Hand-rolled HTTP/1.1 upgrade request/response codec (C2).
//!
//! Parses just enough of the request line and headers to drive the RFC 6455
//! handshake; anything beyond `GET`, the header block and
//! `Sec-WebSocket-Key` is the application's problem (`UpgradeContext`
//! hands the full header map through untouched).

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine as _;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::error::WsError;
use crate::pool::BytePool;

const MAGIC : &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Case-insensitive header map. Duplicate keys: last one wins, matching the
/// parse loop that inserts as it goes.
#[derive(Debug, Default, Clone)]
pub struct HeaderMap {
    entries : HashMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        HeaderMap::default()
    }

    pub fn insert(&mut self, name : impl Into<String>, value : impl Into<String>) {
        self.entries.insert(name.into().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name : &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The parsed request line plus headers. The raw text is kept around since
/// `UpgradeRequest` exposes it verbatim.
#[derive(Debug)]
pub struct RequestHead {
    pub raw : String,
    pub method : String,
    pub path : String,
    pub headers : HeaderMap,
}

/// Reads from `stream` until a full `\r\n\r\n`-terminated request head has
/// arrived, then parses it. Mirrors the original design's "keep reading
/// until the terminator shows up, however many TCP segments that takes".
///
/// A single `read` can return the head plus the start of the first
/// WebSocket frame in one segment; whatever comes after the terminator is
/// returned alongside the parsed head so the caller can hand it to the
/// frame codec instead of letting it vanish.
pub async fn read_request<S : AsyncRead + Unpin>(stream : &mut S) -> Result<(RequestHead, Vec<u8>), WsError> {
    let pool = BytePool::global();
    let mut buf = pool.rent(0);
    let mut used = 0usize;

    loop {
        if used + 1024 > buf.capacity() {
            buf = pool.grow(buf, used);
        }

        let n = stream.read(&mut buf.as_mut_slice()[used ..]).await?;
        if n == 0 {
            pool.release(buf);
            return Err(WsError::ClosedDuringHandshake);
        }
        used += n;

        if let Some(end) = find_subslice(&buf.as_slice()[.. used], b"\r\n\r\n") {
            let raw = String::from_utf8_lossy(&buf.as_slice()[.. end + 4]).into_owned();
            let leftover = buf.as_slice()[end + 4 .. used].to_vec();
            pool.release(buf);
            trace!(bytes = raw.len(), leftover = leftover.len(), "handshake request head received");
            return parse_request(raw).map(|head| (head, leftover));
        }
    }
}

fn find_subslice(haystack : &[u8], needle : &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_request(raw : String) -> Result<RequestHead, WsError> {
    let mut lines = raw.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("/").to_string();

    if !method.eq_ignore_ascii_case("GET") {
        return Err(WsError::MalformedUpgrade("request method is not GET"));
    }

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some(colon) = line.find(':') {
            let name = line[.. colon].trim();
            let value = line[colon + 1 ..].trim_start_matches(' ').trim_end();
            headers.insert(name, value);
        }
    }

    Ok(RequestHead { raw, method, path, headers })
}

/// Derives `Sec-WebSocket-Accept` from the client's nonce, per RFC 6455
/// §4.2.2: `base64(sha1(trim(key) ++ MAGIC))`.
pub fn compute_accept_key(client_key : &str) -> String {
    let concatenated = format!("{}{}", client_key.trim(), MAGIC);
    let digest_hex = sha1_smol::Sha1::from(concatenated).hexdigest();
    let digest_bytes = hex::decode(digest_hex).expect("sha1 hexdigest is always valid hex");
    BASE64.encode(digest_bytes)
}

/// Formats the literal `101 Switching Protocols` success response.
pub fn format_accept_response(client_key : &str, extra_headers : &HeaderMap) -> String {
    let accept = compute_accept_key(client_key);
    let mut resp = format!(
        "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {}\r\n",
        accept
    );
    for (k, v) in extra_headers.iter() {
        resp.push_str(k);
        resp.push_str(": ");
        resp.push_str(v);
        resp.push_str("\r\n");
    }
    resp.push_str("\r\n");
    resp
}

/// Formats a `HTTP/1.1 <code> <reason>` rejection response.
pub fn format_reject_response(status : u16, extra_headers : &HeaderMap) -> String {
    let mut resp = format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status));
    for (k, v) in extra_headers.iter() {
        resp.push_str(k);
        resp.push_str(": ");
        resp.push_str(v);
        resp.push_str("\r\n");
    }
    resp.push_str("\r\n");
    resp
}

/// IANA reason phrases for the status codes this library and its
/// applications are realistically expected to reject with.
const REASON_PHRASES : &[(u16, &str)] = &[
    (101, "Switching Protocols"),
    (200, "OK"),
    (204, "No Content"),
    (301, "Moved Permanently"),
    (302, "Found"),
    (304, "Not Modified"),
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (408, "Request Timeout"),
    (409, "Conflict"),
    (410, "Gone"),
    (413, "Payload Too Large"),
    (418, "I'm a teapot"),
    (426, "Upgrade Required"),
    (429, "Too Many Requests"),
    (500, "Internal Server Error"),
    (501, "Not Implemented"),
    (502, "Bad Gateway"),
    (503, "Service Unavailable"),
];

fn reason_phrase(status : u16) -> &'static str {
    REASON_PHRASES
        .iter()
        .find(|(code, _)| *code == status)
        .map(|(_, reason)| *reason)
        .unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        assert_eq!(compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn accept_response_is_exactly_the_literal_bytes() {
        let headers = HeaderMap::new();
        let resp = format_accept_response("dGhlIHNhbXBsZSBub25jZQ==", &headers);
        assert_eq!(
            resp,
            "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
    }

    #[test]
    fn reject_response_includes_extra_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Reason", "no");
        let resp = format_reject_response(401, &headers);
        assert_eq!(resp, "HTTP/1.1 401 Unauthorized\r\nX-Reason: no\r\n\r\n");
    }

    #[test]
    fn unknown_status_falls_back_to_unknown_reason() {
        let headers = HeaderMap::new();
        let resp = format_reject_response(499, &headers);
        assert_eq!(resp, "HTTP/1.1 499 Unknown\r\n\r\n");
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_last_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("Sec-WebSocket-Key", "first");
        headers.insert("sec-websocket-key", "second");
        assert_eq!(headers.get("SEC-WEBSOCKET-KEY"), Some("second"));
    }

    #[tokio::test]
    async fn read_request_parses_a_complete_handshake() {
        let (mut client, mut server) = duplex(4096);
        let request = "GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        tokio::io::AsyncWriteExt::write_all(&mut client, request.as_bytes()).await.unwrap();

        let (head, leftover) = read_request(&mut server).await.unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/chat");
        assert_eq!(head.headers.get("sec-websocket-key"), Some("dGhlIHNhbXBsZSBub25jZQ=="));
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn read_request_preserves_bytes_read_past_the_terminator() {
        let (mut client, mut server) = duplex(4096);
        let request = "GET /chat HTTP/1.1\r\nHost: x\r\nSec-WebSocket-Key: abc\r\n\r\n";
        let mut sent = request.as_bytes().to_vec();
        sent.extend_from_slice(b"\x81\x02hi"); // a masked-free text frame following right behind
        tokio::io::AsyncWriteExt::write_all(&mut client, &sent).await.unwrap();

        let (head, leftover) = read_request(&mut server).await.unwrap();
        assert_eq!(head.path, "/chat");
        assert_eq!(leftover, b"\x81\x02hi");
    }

    #[tokio::test]
    async fn read_request_byte_by_byte_still_parses() {
        let (mut client, mut server) = duplex(4096);
        let request = "GET / HTTP/1.1\r\nHost: x\r\nSec-WebSocket-Key: abc\r\n\r\n";
        let bytes = request.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            for b in bytes {
                tokio::io::AsyncWriteExt::write_all(&mut client, &[b]).await.unwrap();
            }
        });

        let (head, leftover) = read_request(&mut server).await.unwrap();
        assert_eq!(head.headers.get("host"), Some("x"));
        assert!(leftover.is_empty());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn read_request_reports_closed_during_handshake_on_early_eof() {
        let (client, mut server) = duplex(4096);
        drop(client);
        let err = read_request(&mut server).await.unwrap_err();
        assert!(matches!(err, WsError::ClosedDuringHandshake));
    }

    #[tokio::test]
    async fn read_request_rejects_non_get_method() {
        let (mut client, mut server) = duplex(4096);
        tokio::io::AsyncWriteExt::write_all(&mut client, b"POST / HTTP/1.1\r\n\r\n").await.unwrap();
        let err = read_request(&mut server).await.unwrap_err();
        assert!(matches!(err, WsError::MalformedUpgrade(_)));
    }
}
