//! Proxy server: accept loop and per-connection pipeline.
//!
//! # Responsibilities
//! - Own the listener and accept connections until shutdown
//! - Serve each connection on its own task
//! - Read one request, validate it, answer from cache or origin, close
//! - Write cacheable origin responses back to the cache
//! - Turn every failure into some response; never stop the accept loop

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::cache::CacheStore;
use crate::config::ProxyConfig;
use crate::http::origin::OriginClient;
use crate::http::request::ParsedRequest;
use crate::http::response::{internal_error, rejection, CacheStatus, OriginReply, Status};
use crate::net::{ConnectionGuard, ConnectionState, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::resilience::with_timeout;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// The caching forward proxy.
pub struct ProxyServer {
    listener: Listener,
    handler: ConnectionHandler,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Bind the configured address and build the server.
    pub async fn bind(config: &ProxyConfig) -> Result<Self, ListenerError> {
        let listener = Listener::bind(&config.listener).await?;
        Ok(Self::with_listener(config, listener))
    }

    /// Build the server around an existing listener.
    pub fn with_listener(config: &ProxyConfig, listener: Listener) -> Self {
        Self {
            listener,
            handler: ConnectionHandler::new(config),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Get the local address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle on the in-flight connection count, usable after `run` consumes the server.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept and serve connections until `shutdown` fires.
    ///
    /// In-flight connections keep running after this returns; use
    /// [`ConnectionTracker::wait_idle`] to wait for them.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        match self.handler.cache.remove_temp_files().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Removed leftover cache temp files"),
            Err(e) => tracing::warn!(error = %e, "Failed to scan cache root for temp files"),
        }

        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(
                address = %addr,
                cache_root = %self.handler.cache.root().display(),
                "Proxy server ready to serve"
            );
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let handler = self.handler.clone();
                        let conn = self.tracker.track();
                        tokio::spawn(async move {
                            handler.serve(stream, peer, conn).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!(
                        in_flight = self.tracker.active_count(),
                        "Proxy server stopped accepting"
                    );
                    break;
                }
            }
        }
    }
}

/// Everything needed to serve one connection. Cheap to clone per task.
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    cache: CacheStore,
    origin: OriginClient,
    read_buffer_size: usize,
    client_read_timeout: Duration,
    bypass_on_client_headers: bool,
}

impl ConnectionHandler {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            cache: CacheStore::new(config.cache.root.clone()),
            origin: OriginClient::new(&config.origin),
            read_buffer_size: config.listener.read_buffer_size.max(1),
            client_read_timeout: Duration::from_secs(config.timeouts.client_read_secs),
            bypass_on_client_headers: config.cache.bypass_on_client_headers,
        }
    }

    /// Serve a single connection from accept to close.
    async fn serve(&self, mut stream: TcpStream, peer: SocketAddr, mut conn: ConnectionGuard) {
        let span = tracing::info_span!("connection", connection_id = %conn.id(), peer = %peer);

        async move {
            let start = Instant::now();
            let mut buf = vec![0u8; self.read_buffer_size];

            // One bounded read; requests larger than the buffer are not reassembled.
            let n = match with_timeout(self.client_read_timeout, stream.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to read client request");
                    self.abort(&mut stream, &mut conn).await;
                    metrics::record_request("client_error", start);
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Client did not send a request in time");
                    self.abort(&mut stream, &mut conn).await;
                    metrics::record_request("client_timeout", start);
                    return;
                }
            };
            tracing::debug!(bytes = n, "Received client request");

            let (response, outcome) = self.respond(&buf[..n], &mut conn).await;

            if let Err(e) = stream.write_all(&response).await {
                tracing::warn!(error = %e, "Failed to send response to client");
            }
            conn.transition(ConnectionState::Responded);
            let _ = stream.shutdown().await;

            metrics::record_request(outcome, start);
            tracing::info!(outcome, elapsed_ms = start.elapsed().as_millis() as u64, "Request complete");
        }
        .instrument(span)
        .await
    }

    /// Answer a connection whose request could not be read with a bare 500.
    async fn abort(&self, stream: &mut TcpStream, conn: &mut ConnectionGuard) {
        if let Err(e) = stream.write_all(&internal_error()).await {
            tracing::debug!(error = %e, "Client gone before error response");
        }
        conn.transition(ConnectionState::Responded);
        let _ = stream.shutdown().await;
    }

    /// Produce the response bytes for one raw request, plus an outcome label.
    pub async fn respond(&self, raw: &[u8], conn: &mut ConnectionGuard) -> (Vec<u8>, &'static str) {
        let request = match ParsedRequest::parse(raw) {
            Ok(request) => request,
            Err(err) => {
                tracing::info!(reason = err.kind(), "Rejected client request");
                return (rejection(&err), err.kind());
            }
        };
        conn.transition(ConnectionState::Parsed);
        tracing::debug!(key = %request.target, "Parsed request");

        if let Some(cached) = self.lookup(&request).await {
            conn.transition(ConnectionState::CacheHit);
            tracing::info!(key = %request.target, "Serving from cache");
            return (cached, CacheStatus::Hit.as_str());
        }

        conn.transition(ConnectionState::CacheMiss);
        tracing::info!(key = %request.target, "Cache miss, fetching from origin");
        let reply = self.fetch(&request).await;
        let outcome = match reply.status {
            Status::Ok => "origin_ok",
            Status::NotFound => "origin_not_found",
            Status::InternalServerError => "origin_error",
        };
        (reply.client, outcome)
    }

    /// Cached bytes for the request, if any. Read failures count as a miss.
    async fn lookup(&self, request: &ParsedRequest) -> Option<Vec<u8>> {
        if self.bypass_on_client_headers && request.has_extra_headers() {
            tracing::debug!("Client sent headers, bypassing cache lookup");
            metrics::record_cache_lookup("bypass");
            return None;
        }

        if !self.cache.exists(&request.target).await {
            metrics::record_cache_lookup("miss");
            return None;
        }

        match self.cache.read(&request.target).await {
            Ok(bytes) => {
                metrics::record_cache_lookup("hit");
                Some(bytes)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cache read failed, treating as miss");
                metrics::record_cache_lookup("error");
                None
            }
        }
    }

    /// Fetch from the origin and cache the result when it is a 200.
    async fn fetch(&self, request: &ParsedRequest) -> OriginReply {
        let raw = match self.origin.fetch(request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %request.target, error = %e, "Origin fetch failed");
                metrics::record_origin_fetch(e.kind());
                return OriginReply::failed();
            }
        };

        let reply = OriginReply::classify(&raw);
        metrics::record_origin_fetch(match reply.status {
            Status::Ok => "200",
            Status::NotFound => "404",
            Status::InternalServerError => "other",
        });

        if let Some(cacheable) = &reply.cacheable {
            match self.cache.write(&request.target, cacheable).await {
                Ok(()) => metrics::record_cache_write("ok"),
                Err(e) => {
                    tracing::warn!(error = %e, "Cache write failed, serving response uncached");
                    metrics::record_cache_write("error");
                }
            }
        }

        reply
    }
}
