//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hard cap on a single origin response, in bytes (16 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Root configuration for the caching proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// On-disk cache settings.
    pub cache: CacheConfig,

    /// Origin leg settings (timeouts, size cap).
    pub origin: OriginConfig,

    /// Client-side timeouts.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Replace the port of the bind address, keeping the configured host.
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        self.listener.bind_address = format!("{}:{}", host, port);
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Size of the single read taken from a client connection.
    pub read_buffer_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 1024,
            read_buffer_size: 1024,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory of the cache hierarchy.
    pub root: PathBuf,

    /// Skip the cache lookup when the client sent extra headers.
    pub bypass_on_client_headers: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./cache"),
            bypass_on_client_headers: false,
        }
    }
}

/// Origin connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Timeout for each read from the origin in seconds.
    pub read_timeout_secs: u64,

    /// Responses reaching this many bytes before EOF are rejected.
    pub max_response_bytes: usize,

    /// Chunk size for reads from the origin.
    pub read_buffer_size: usize,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            read_buffer_size: 1024,
        }
    }
}

/// Timeout configuration for the client side of a connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for the client to send its request, in seconds.
    pub client_read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            client_read_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
