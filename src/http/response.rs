//! Response envelopes sent back to clients.
//!
//! # Responsibilities
//! - Synthesize the status line and `Cache Hit` marker for every response
//! - Classify a raw origin response (200 / 404 / anything else)
//! - Produce the cacheable and client-facing forms of a 200 from one body
//!
//! # Envelope
//! ```text
//! HTTP/1.1 <status> <reason>\r\n
//! Cache Hit: <0|1>\r\n
//! \r\n
//! <body>
//! ```
//!
//! # Design Decisions
//! - Origin status lines and headers are never passed through; only the body is
//! - Framing is left to connection close, so no Content-Length is added

use crate::http::request::RequestError;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Whether a response came out of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    fn marker(self) -> &'static str {
        match self {
            CacheStatus::Hit => "1",
            CacheStatus::Miss => "0",
        }
    }

    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        }
    }
}

/// Status lines the proxy can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    InternalServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

/// Build a client-facing response.
pub fn envelope(status: Status, cache: CacheStatus, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nCache Hit: {}\r\n\r\n",
        status.code(),
        status.reason(),
        cache.marker()
    );
    let mut out = Vec::with_capacity(head.len() + body.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(body);
    out
}

/// The 500 sent for any origin failure.
pub fn internal_error() -> Vec<u8> {
    envelope(Status::InternalServerError, CacheStatus::Miss, b"")
}

/// Plain-text reply for a rejected client request.
pub fn rejection(err: &RequestError) -> Vec<u8> {
    format!("{}\r\n\r\n", err).into_bytes()
}

/// What to do with a response fetched from the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginReply {
    /// Status sent to the client.
    pub status: Status,
    /// Bytes sent to the client.
    pub client: Vec<u8>,
    /// Bytes to store in the cache, if the response is cacheable.
    pub cacheable: Option<Vec<u8>>,
}

impl OriginReply {
    /// Classify a raw origin response.
    pub fn classify(raw: &[u8]) -> Self {
        let (code, body) = match (status_code(raw), body_of(raw)) {
            (Some(code), Some(body)) => (code, body),
            _ => return Self::failed(),
        };

        match code {
            "200" => Self {
                status: Status::Ok,
                client: envelope(Status::Ok, CacheStatus::Miss, body),
                cacheable: Some(envelope(Status::Ok, CacheStatus::Hit, body)),
            },
            "404" => Self {
                status: Status::NotFound,
                client: envelope(Status::NotFound, CacheStatus::Miss, body),
                cacheable: None,
            },
            _ => Self::failed(),
        }
    }

    /// Reply used when the origin could not be reached or read.
    pub fn failed() -> Self {
        Self {
            status: Status::InternalServerError,
            client: internal_error(),
            cacheable: None,
        }
    }
}

/// Second token of the status line.
fn status_code(raw: &[u8]) -> Option<&str> {
    let line_end = raw.iter().position(|&b| b == b'\n').unwrap_or(raw.len());
    let line = std::str::from_utf8(&raw[..line_end]).ok()?;
    line.split_whitespace().nth(1)
}

/// Bytes after the first blank line.
fn body_of(raw: &[u8]) -> Option<&[u8]> {
    raw.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| &raw[pos + HEADER_TERMINATOR.len()..])
}
