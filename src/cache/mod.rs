//! On-disk response cache.
//!
//! # Data Flow
//! ```text
//! Target (host, port, path)
//!     → key.rs (derive <root>/<host>/<port><path>)
//!     → store.rs (exists / read / write)
//!     → lock.rs (per-key mutex around writes)
//! ```
//!
//! # Design Decisions
//! - The filesystem is the only store; nothing is indexed in memory
//! - Only 200 responses are written, in their `Cache Hit: 1` form
//! - Writes go through a temp file and rename; entries never expire
//! - Cache failures are logged by callers and never fail a request

pub mod key;
pub mod lock;
pub mod store;

pub use store::{CacheError, CacheStore};
