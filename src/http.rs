//! Minimal HTTP/1.1 request-line/header framing for the opening handshake
//! only — no bodies, no chunked encoding, no keep-alive request pipelining.
//! A full HTTP/1.1 parser is out of scope; this module's only job is to get
//! the GET request and 101 response on and off the wire intact, including
//! repeated `Sec-WebSocket-Extensions`/`Sec-WebSocket-Protocol` headers that
//! a `HashMap<String, String>` can't represent.
//!
//! Adapted from the teacher's `protocol::request`/`protocol::response`,
//! generalized to multi-valued headers and trimmed to what a handshake
//! needs.

use crate::error::{HandshakeError, WsError};
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Case-insensitively look up the first header named `name`.
fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// All values of a header that may legally repeat (e.g.
    /// `Sec-WebSocket-Extensions`), in wire order.
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn parse(buffer: &[u8]) -> std::result::Result<Self, HandshakeError> {
        let text = std::str::from_utf8(buffer)
            .map_err(|_| HandshakeError::InvalidMessage("request is not valid UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines
            .next()
            .ok_or_else(|| HandshakeError::InvalidMessage("empty request".into()))?;
        let mut parts = request_line.split(' ');
        let method = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidMessage("missing method".into()))?
            .to_string();
        let target = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidMessage("missing request target".into()))?
            .to_string();
        let version = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidMessage("missing HTTP version".into()))?
            .to_string();

        let headers = parse_headers(lines)?;

        Ok(HttpRequest {
            method,
            target,
            version,
            headers,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.target, self.version);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn parse(buffer: &[u8]) -> std::result::Result<Self, HandshakeError> {
        let text = std::str::from_utf8(buffer)
            .map_err(|_| HandshakeError::InvalidMessage("response is not valid UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines
            .next()
            .ok_or_else(|| HandshakeError::InvalidMessage("empty response".into()))?;
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidMessage("missing HTTP version".into()))?;
        let status: u16 = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidMessage("missing status code".into()))?
            .parse()
            .map_err(|_| HandshakeError::InvalidMessage("status code is not numeric".into()))?;
        let reason = parts.next().unwrap_or("").to_string();

        let headers = parse_headers(lines)?;

        Ok(HttpResponse {
            status,
            reason,
            headers,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> std::result::Result<Vec<(String, String)>, HandshakeError> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let colon = line.find(':').ok_or_else(|| {
            HandshakeError::InvalidMessage(format!("malformed header line: {line:?}"))
        })?;
        let name = line[..colon].trim().to_string();
        let value = line[colon + 1..].trim().to_string();
        headers.push((name, value));
    }
    Ok(headers)
}

/// Read bytes from `reader` until the blank line ending the header block,
/// bounded by [`MAX_HEADER_BYTES`] to stop a peer from exhausting memory
/// with a header bomb.
async fn read_until_headers_end<R>(reader: &mut R) -> Result<Vec<u8>, WsError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).await?;
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            return Ok(buf[..buf.len() - 2].to_vec());
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(WsError::InvalidHandshake(HandshakeError::InvalidMessage(
                "handshake headers exceeded the size limit".into(),
            )));
        }
    }
}

pub async fn read_request<R>(reader: &mut R) -> Result<HttpRequest, WsError>
where
    R: AsyncRead + Unpin,
{
    let buf = read_until_headers_end(reader).await?;
    Ok(HttpRequest::parse(&buf)?)
}

pub async fn read_response<R>(reader: &mut R) -> Result<HttpResponse, WsError>
where
    R: AsyncRead + Unpin,
{
    let buf = read_until_headers_end(reader).await?;
    Ok(HttpResponse::parse(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_get_request_with_repeated_headers() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: example.com\r\nSec-WebSocket-Extensions: a\r\nSec-WebSocket-Extensions: b\r\n\r\n";
        let request = HttpRequest::parse(raw).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.target, "/chat");
        assert_eq!(request.header("host"), Some("example.com"));
        let exts: Vec<&str> = request.headers_named("sec-websocket-extensions").collect();
        assert_eq!(exts, vec!["a", "b"]);
    }

    #[test]
    fn round_trips_a_response() {
        let response = HttpResponse::new(101, "Switching Protocols")
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade");
        let bytes = response.to_bytes();
        let parsed = HttpResponse::parse(&bytes[..bytes.len() - 2]).unwrap();
        assert_eq!(parsed.status, 101);
        assert_eq!(parsed.header("upgrade"), Some("websocket"));
    }

    #[test]
    fn rejects_a_malformed_header_line() {
        let raw = b"GET / HTTP/1.1\r\nnotaheader\r\n\r\n";
        assert!(HttpRequest::parse(raw).is_err());
    }
}
