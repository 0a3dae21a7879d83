//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, cache lookups, origin fetches, connections)
//! - Expose Prometheus-compatible metrics endpoint when enabled
//!
//! # Metrics
//! - `proxy_requests_total` (counter): completed requests by outcome
//! - `proxy_request_duration_seconds` (histogram): time from accept to response
//! - `proxy_cache_lookups_total` (counter): lookups by result (hit, miss, error)
//! - `proxy_cache_writes_total` (counter): cache writes by result
//! - `proxy_origin_fetches_total` (counter): origin fetches by status or error kind
//! - `proxy_active_connections` (gauge): current connection count
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are fixed, low-cardinality strings (never hosts or paths)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter, serving scrapes on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished client request.
pub fn record_request(outcome: &'static str, start: Instant) {
    ::metrics::counter!("proxy_requests_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a cache lookup result.
pub fn record_cache_lookup(result: &'static str) {
    ::metrics::counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

/// Record a cache write result.
pub fn record_cache_write(result: &'static str) {
    ::metrics::counter!("proxy_cache_writes_total", "result" => result).increment(1);
}

/// Record an origin fetch by status code or error kind.
pub fn record_origin_fetch(status: &'static str) {
    ::metrics::counter!("proxy_origin_fetches_total", "status" => status).increment(1);
}

/// Update the active connection gauge.
pub fn record_active_connections(count: u64) {
    ::metrics::gauge!("proxy_active_connections").set(count as f64);
}
