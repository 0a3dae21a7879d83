//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track per-connection state (Accepted → Parsed → CacheHit/CacheMiss → Responded → Closed)
//! - Generate unique connection IDs for tracing
//! - Count in-flight connections for shutdown reporting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its single request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, request not yet parsed.
    Accepted,
    /// Request parsed and validated.
    Parsed,
    /// Served from the cache.
    CacheHit,
    /// Fetching from the origin.
    CacheMiss,
    /// Response written to the client.
    Responded,
    /// Socket closed. Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Accepted, Parsed)
                | (Accepted, Responded)
                | (Parsed, CacheHit)
                | (Parsed, CacheMiss)
                | (CacheHit, Responded)
                | (CacheMiss, Responded)
                | (_, Closed)
        ) && self != Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::Parsed => "parsed",
            ConnectionState::CacheHit => "cache_hit",
            ConnectionState::CacheMiss => "cache_miss",
            ConnectionState::Responded => "responded",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks active connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_active_connections(active);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
            state: ConnectionState::Accepted,
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `limit` elapses.
    ///
    /// Returns `true` if every connection finished in time.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

/// Guard that tracks a connection's lifetime and state.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
    state: ConnectionState,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`, logging the transition.
    pub fn transition(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                connection_id = %self.id,
                from = %self.state,
                to = %next,
                "Unexpected connection state transition"
            );
        }
        tracing::trace!(connection_id = %self.id, from = %self.state, to = %next, "Connection state");
        self.state = next;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.state != ConnectionState::Closed {
            self.transition(ConnectionState::Closed);
        }
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_active_connections(active);
    }
}
