//! Origin server client.
//!
//! # Responsibilities
//! - Rebuild a minimal GET for the origin (path, Host, `Connection: close`)
//! - Open one TCP connection per fetch, bounded by a connect timeout
//! - Read until the origin closes, bounded by a per-read timeout and a size cap
//!
//! # Design Decisions
//! - Framing relies on `Connection: close`; Content-Length and chunked
//!   encoding are not parsed, so origins must close after the response
//! - The size cap aborts the fetch; partial responses are never relayed

use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::OriginConfig;
use crate::http::request::{ParsedRequest, Target};
use crate::resilience::{with_timeout, TimedOut};

/// Failures on the origin leg. All of them become a 500 for the client.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("origin {addr} {stage} {source}")]
    Timeout {
        addr: String,
        stage: &'static str,
        #[source]
        source: TimedOut,
    },

    #[error("I/O error with origin {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("origin response reached the {limit} byte limit before the connection closed")]
    ResponseTooLarge { limit: usize },
}

impl OriginError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            OriginError::Connect { .. } => "connect",
            OriginError::Timeout { .. } => "timeout",
            OriginError::Io { .. } => "io",
            OriginError::ResponseTooLarge { .. } => "too_large",
        }
    }
}

/// Fetches targets from origin servers.
#[derive(Debug, Clone)]
pub struct OriginClient {
    connect_timeout: Duration,
    read_timeout: Duration,
    max_response_bytes: usize,
    read_buffer_size: usize,
}

impl OriginClient {
    pub fn new(config: &OriginConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            max_response_bytes: config.max_response_bytes,
            read_buffer_size: config.read_buffer_size.max(1),
        }
    }

    /// Wire form of the request sent to the origin.
    pub fn build_request(target: &Target, extra_headers: &[String]) -> String {
        let mut msg = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n",
            target.path, target.host
        );
        for line in extra_headers {
            msg.push_str(line);
            msg.push_str("\r\n");
        }
        msg.push_str("\r\n");
        msg
    }

    /// Send `request` to its origin and return the complete raw response.
    pub async fn fetch(&self, request: &ParsedRequest) -> Result<Vec<u8>, OriginError> {
        let target = &request.target;
        let addr = format!("{}:{}", target.host, target.port);

        let mut stream = match with_timeout(
            self.connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(OriginError::Connect { addr, source }),
            Err(source) => {
                return Err(OriginError::Timeout {
                    addr,
                    stage: "connect",
                    source,
                })
            }
        };

        let wire = Self::build_request(target, &request.extra_headers);
        tracing::debug!(origin = %addr, path = %target.path, "Sending request to origin");

        if let Err(source) = stream.write_all(wire.as_bytes()).await {
            return Err(OriginError::Io { addr, source });
        }

        let response = self.read_to_close(&mut stream, &addr).await?;
        tracing::debug!(origin = %addr, bytes = response.len(), "Origin response received");
        Ok(response)
    }

    /// Accumulate everything the peer sends until it closes.
    pub async fn read_to_close<R>(&self, stream: &mut R, addr: &str) -> Result<Vec<u8>, OriginError>
    where
        R: AsyncRead + Unpin,
    {
        let mut received = Vec::new();
        let mut buf = vec![0u8; self.read_buffer_size];

        loop {
            let n = match with_timeout(self.read_timeout, stream.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(source)) => {
                    return Err(OriginError::Io {
                        addr: addr.to_string(),
                        source,
                    })
                }
                Err(source) => {
                    return Err(OriginError::Timeout {
                        addr: addr.to_string(),
                        stage: "read",
                        source,
                    })
                }
            };
            if n == 0 {
                return Ok(received);
            }

            received.extend_from_slice(&buf[..n]);
            if received.len() >= self.max_response_bytes {
                return Err(OriginError::ResponseTooLarge {
                    limit: self.max_response_bytes,
                });
            }
        }
    }
}
