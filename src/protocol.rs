//! Request/status line codec for the file transfer protocol.
//!
//! Wire format (all control messages end in `\r\n`):
//! - Greeting: `Connected to Server..`
//! - Request: `METHOD PATH HTTP/1.1\r\nHEADER\r\nBODY`
//! - Status: `HTTP/1.1 200 OK`, `HTTP/1.1 404 Not Found`, `HTTP/1.1 400 Bad Request`
//!
//! Paths and headers are not escaped. A path containing whitespace, the line
//! terminator or the token `CLOSE` breaks framing.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Line the server sends on accept
pub const GREETING: &str = "Connected to Server..";

/// Protocol version token carried on every request line
pub const VERSION: &str = "HTTP/1.1";

/// Header announcing the size of a raw payload
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Ends the request line and the header line of a request frame. The space
/// is consumed by the next line read or skipped before a POST payload.
pub const FRAME_SEPARATOR: &[u8] = b"\r\n ";

const CLOSE_TOKEN: &str = "CLOSE";
const OK_TOKEN: &str = "OK";
const NOT_FOUND_TOKEN: &str = "Not Found";

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Close,
}

impl Method {
    /// Parse a method token, ignoring case.
    pub fn parse(token: &str) -> Option<Method> {
        if token.eq_ignore_ascii_case("GET") {
            Some(Method::Get)
        } else if token.eq_ignore_ascii_case("POST") {
            Some(Method::Post)
        } else if token.eq_ignore_ascii_case(CLOSE_TOKEN) {
            Some(Method::Close)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Close => CLOSE_TOKEN,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Extension slot; carries `Content-Length` on POST
    pub header: String,
    /// Reserved, always empty on the wire today
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            header: String::new(),
            body: Bytes::new(),
        }
    }

    /// Attach the header line read after the request line.
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    /// Payload size announced in the header, if any.
    pub fn content_length(&self) -> Result<Option<u64>> {
        if self.header.trim().is_empty() {
            return Ok(None);
        }
        parse_content_length(&self.header).map(Some)
    }

    pub fn encode(&self) -> BytesMut {
        encode_request(self.method, &self.path, &self.header, &self.body)
    }
}

/// Canonical server replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    BadRequest,
}

impl Status {
    /// The exact line sent on the wire, terminator included.
    pub fn line(&self) -> &'static [u8] {
        match self {
            Status::Ok => b"HTTP/1.1 200 OK\r\n",
            Status::NotFound => b"HTTP/1.1 404 Not Found\r\n",
            Status::BadRequest => b"HTTP/1.1 400 Bad Request\r\n",
        }
    }
}

/// Build one request frame: `METHOD PATH HTTP/1.1\r\n HEADER\r\n BODY`.
pub fn encode_request(method: Method, path: &str, header: &str, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(
        method.as_str().len() + path.len() + header.len() + body.len() + VERSION.len() + 8,
    );
    buf.put_slice(method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(path.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(VERSION.as_bytes());
    buf.put_slice(FRAME_SEPARATOR);
    buf.put_slice(header.as_bytes());
    buf.put_slice(FRAME_SEPARATOR);
    buf.put_slice(body);
    buf
}

/// Parse a request line (without its terminator).
///
/// `CLOSE` needs no path. `GET` and `POST` need a path token that is not the
/// version token.
pub fn decode_request(line: &str) -> Result<Request> {
    let mut parts = line.split_whitespace();

    let token = parts
        .next()
        .ok_or_else(|| Error::MalformedRequest("empty request line".to_string()))?;
    let method = Method::parse(token)
        .ok_or_else(|| Error::MalformedRequest(format!("unknown method: {}", token)))?;

    if method == Method::Close {
        return Ok(Request::new(Method::Close, ""));
    }

    match parts.next() {
        Some(path) if !path.starts_with("HTTP/") => Ok(Request::new(method, path)),
        _ => Err(Error::MalformedRequest(format!(
            "{} requires a path",
            method
        ))),
    }
}

/// True if the line carries the close sentinel.
pub fn is_close(line: &str) -> bool {
    line.contains(CLOSE_TOKEN)
}

/// True if the status line signals success.
pub fn is_ok(line: &str) -> bool {
    line.contains(OK_TOKEN)
}

/// True if the status line signals a missing resource.
pub fn is_not_found(line: &str) -> bool {
    line.contains(NOT_FOUND_TOKEN)
}

/// Format a `Content-Length` header line (without terminator).
pub fn content_length_header(len: u64) -> String {
    format!("{}: {}", CONTENT_LENGTH, len)
}

/// Parse a `Content-Length: N` header line.
pub fn parse_content_length(line: &str) -> Result<u64> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::Protocol(format!("expected {} header, got {:?}", CONTENT_LENGTH, line)))?;

    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Err(Error::Protocol(format!("unexpected header: {}", name.trim())));
    }

    value
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Protocol(format!("invalid {}: {}", CONTENT_LENGTH, value.trim())))
}
