//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to origin:
//!     → timeouts.rs (enforce connect/read deadline)
//!     → On failure: origin error → 500 to the client
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No retries: one origin attempt per client request

pub mod timeouts;

pub use timeouts::{with_timeout, TimedOut};
