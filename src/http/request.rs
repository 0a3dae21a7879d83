//! Client request parsing and validation.
//!
//! # Responsibilities
//! - Decompose the first chunk read from a client into request line and headers
//! - Validate method, target URL and protocol version, in that order
//! - Derive the origin [`Target`] (host, port, path) from the absolute URL
//!
//! # Design Decisions
//! - The request line is split on whitespace; tokens after the version are
//!   kept as one header line (interactive clients send everything on one line)
//! - Header lines are passed through untouched except `Host` and `Connection`,
//!   which the proxy writes itself
//! - Validation short-circuits: length → method → URL → version

use std::fmt;
use thiserror::Error;
use url::{Host, Url};

/// Port used when the target URL does not name one.
pub const DEFAULT_HTTP_PORT: u16 = 80;

const SUPPORTED_METHOD: &str = "GET";
const SUPPORTED_VERSION: &str = "HTTP/1.1";

/// Headers the proxy sets on the origin request and never forwards.
const PROXY_OWNED_HEADERS: [&str; 2] = ["host", "connection"];

/// Reasons a client request is rejected.
///
/// The `Display` text is exactly what the client receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Message length incorrect. Should be >= 3.")]
    MalformedRequest,

    #[error("Method incorrect. Should be GET.")]
    UnsupportedMethod,

    #[error("Invalid URL.")]
    InvalidUrl,

    #[error("HTTP version incorrect. Should be HTTP/1.1.")]
    UnsupportedVersion,
}

impl RequestError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::MalformedRequest => "malformed_request",
            RequestError::UnsupportedMethod => "unsupported_method",
            RequestError::InvalidUrl => "invalid_url",
            RequestError::UnsupportedVersion => "unsupported_version",
        }
    }
}

/// Origin location addressed by a request; also the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Always starts with `/`. Includes the query string when present.
    pub path: String,
}

impl Target {
    /// Parse an absolute URL. Relative URLs and URLs without a host yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let host = match url.host()? {
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => addr.to_string(),
        };
        if host.is_empty() {
            return None;
        }

        let mut path = url.path().to_string();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Some(Self {
            host,
            port: written_port(&url, raw).unwrap_or(DEFAULT_HTTP_PORT),
            path,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

/// A validated client request. Lives for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub target: Target,
    pub version: String,
    /// Header lines to pass through to the origin, without line terminators.
    pub extra_headers: Vec<String>,
}

impl ParsedRequest {
    /// Parse and validate raw client bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, RequestError> {
        let text = String::from_utf8_lossy(raw);
        let head = message_head(text.trim_start());
        let mut lines = head.lines();

        let request_line = lines.next().unwrap_or_default();
        let tokens: Vec<&str> = request_line.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(RequestError::MalformedRequest);
        }

        let method = tokens[0];
        if method != SUPPORTED_METHOD {
            return Err(RequestError::UnsupportedMethod);
        }

        let target = Target::parse(tokens[1]).ok_or(RequestError::InvalidUrl)?;

        let version = tokens[2];
        if version != SUPPORTED_VERSION {
            return Err(RequestError::UnsupportedVersion);
        }

        let trailing = (tokens.len() > 3).then(|| tokens[3..].join(" "));
        let extra_headers = trailing
            .into_iter()
            .chain(lines.map(|line| line.trim().to_string()))
            .filter(|line| !line.is_empty() && !is_proxy_owned(line))
            .collect();

        Ok(Self {
            method: method.to_string(),
            target,
            version: version.to_string(),
            extra_headers,
        })
    }

    /// Whether the client sent any header to pass through.
    pub fn has_extra_headers(&self) -> bool {
        !self.extra_headers.is_empty()
    }

    /// Extra header lines joined with CRLF, without a trailing terminator.
    pub fn extra_headers(&self) -> String {
        self.extra_headers.join("\r\n")
    }
}

/// The port written in the URL. `Url::port` hides a port equal to the
/// scheme default (`https://h:443/`), so that case is read from the authority.
fn written_port(url: &Url, raw: &str) -> Option<u16> {
    if let Some(port) = url.port() {
        return Some(port);
    }
    let default = url.port_or_known_default()?;
    let (_, rest) = raw.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host_port)| host_port);
    let (_, port) = host_port.rsplit_once(':')?;
    (port.parse::<u16>().ok()? == default).then_some(default)
}

/// Everything before the first blank line.
fn message_head(text: &str) -> &str {
    let crlf = text.find("\r\n\r\n");
    let lf = text.find("\n\n");
    let end = match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => text.len(),
    };
    &text[..end]
}

fn is_proxy_owned(line: &str) -> bool {
    let name = line.split(':').next().unwrap_or_default().trim();
    PROXY_OWNED_HEADERS
        .iter()
        .any(|owned| name.eq_ignore_ascii_case(owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<ParsedRequest, RequestError> {
        ParsedRequest::parse(raw.as_bytes())
    }

    #[test]
    fn parses_minimal_request_line() {
        let req = parse("GET http://example.org/index.html HTTP/1.1").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(
            req.target,
            Target {
                host: "example.org".into(),
                port: 80,
                path: "/index.html".into(),
            }
        );
        assert!(!req.has_extra_headers());
    }

    #[test]
    fn fewer_than_three_tokens_is_malformed() {
        assert_eq!(parse(""), Err(RequestError::MalformedRequest));
        assert_eq!(parse("GET"), Err(RequestError::MalformedRequest));
        assert_eq!(
            parse("GET http://example.org/\r\n\r\n"),
            Err(RequestError::MalformedRequest)
        );
    }

    #[test]
    fn validation_order_is_length_method_url_version() {
        // Everything is wrong: method is reported first.
        assert_eq!(
            parse("POST not-a-url HTTP/1.0"),
            Err(RequestError::UnsupportedMethod)
        );
        assert_eq!(parse("GET not-a-url HTTP/1.0"), Err(RequestError::InvalidUrl));
        assert_eq!(
            parse("GET http://example.org/ HTTP/1.0"),
            Err(RequestError::UnsupportedVersion)
        );
    }

    #[test]
    fn method_match_is_case_sensitive() {
        assert_eq!(
            parse("get http://example.org/ HTTP/1.1"),
            Err(RequestError::UnsupportedMethod)
        );
    }

    #[test]
    fn version_match_is_exact() {
        assert_eq!(
            parse("GET http://example.org/ http/1.1"),
            Err(RequestError::UnsupportedVersion)
        );
        assert_eq!(
            parse("GET http://example.org/ HTTP/2"),
            Err(RequestError::UnsupportedVersion)
        );
    }

    #[test]
    fn relative_and_hostless_urls_are_invalid() {
        assert_eq!(parse("GET /index.html HTTP/1.1"), Err(RequestError::InvalidUrl));
        assert_eq!(parse("GET example.org/x HTTP/1.1"), Err(RequestError::InvalidUrl));
        assert_eq!(
            parse("GET mailto:someone@example.org HTTP/1.1"),
            Err(RequestError::InvalidUrl)
        );
    }

    #[test]
    fn explicit_port_and_query_are_kept() {
        let req = parse("GET http://127.0.0.1:8081/search?q=rust HTTP/1.1").unwrap();
        assert_eq!(req.target.host, "127.0.0.1");
        assert_eq!(req.target.port, 8081);
        assert_eq!(req.target.path, "/search?q=rust");
        assert_eq!(req.target.to_string(), "127.0.0.1:8081/search?q=rust");
    }

    #[test]
    fn explicit_scheme_default_port_is_kept() {
        let req = parse("GET https://example.org:443/ HTTP/1.1").unwrap();
        assert_eq!(req.target.port, 443);
        let req = parse("GET http://example.org:80/ HTTP/1.1").unwrap();
        assert_eq!(req.target.port, 80);
    }

    #[test]
    fn missing_port_defaults_to_80_for_any_scheme() {
        assert_eq!(parse("GET https://example.org/ HTTP/1.1").unwrap().target.port, 80);
        assert_eq!(parse("GET https://[::1]/ HTTP/1.1").unwrap().target.port, 80);
        assert_eq!(parse("GET https://user@example.org/ HTTP/1.1").unwrap().target.port, 80);
    }

    #[test]
    fn bare_authority_gets_root_path() {
        let req = parse("GET http://example.org HTTP/1.1").unwrap();
        assert_eq!(req.target.path, "/");
    }

    #[test]
    fn ipv6_host_is_unbracketed() {
        let req = parse("GET http://[::1]:8080/ HTTP/1.1").unwrap();
        assert_eq!(req.target.host, "::1");
        assert_eq!(req.target.port, 8080);
    }

    #[test]
    fn trailing_tokens_become_one_header_line() {
        let req = parse("GET http://example.org/ HTTP/1.1 If-None-Match: \"abc\"").unwrap();
        assert_eq!(req.extra_headers, vec!["If-None-Match: \"abc\"".to_string()]);
    }

    #[test]
    fn header_lines_pass_through_except_proxy_owned() {
        let req = parse(
            "GET http://example.org/ HTTP/1.1\r\n\
             Host: example.org\r\n\
             User-Agent: curl/8.0\r\n\
             connection: keep-alive\r\n\
             Accept: */*\r\n\
             \r\n\
             ignored body",
        )
        .unwrap();
        assert_eq!(
            req.extra_headers,
            vec!["User-Agent: curl/8.0".to_string(), "Accept: */*".to_string()]
        );
        assert_eq!(req.extra_headers(), "User-Agent: curl/8.0\r\nAccept: */*");
    }

    #[test]
    fn bare_lf_line_endings_are_accepted() {
        let req = parse("GET http://example.org/a HTTP/1.1\nAccept: text/html\n\n").unwrap();
        assert_eq!(req.extra_headers, vec!["Accept: text/html".to_string()]);
    }

    #[test]
    fn leading_blank_lines_are_skipped() {
        assert!(parse("\r\nGET http://example.org/ HTTP/1.1\r\n\r\n").is_ok());
    }

    #[test]
    fn error_text_is_client_message() {
        assert_eq!(
            RequestError::MalformedRequest.to_string(),
            "Message length incorrect. Should be >= 3."
        );
        assert_eq!(RequestError::InvalidUrl.to_string(), "Invalid URL.");
    }
}
