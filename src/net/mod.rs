//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → Hand off to ProxyServer
//!
//! Connection States:
//!     Accepted → Parsed → CacheHit | CacheMiss → Responded → Closed
//!     Accepted → Responded → Closed   (rejected request)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - One request per connection; no keep-alive

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
pub use listener::{Listener, ListenerError};
