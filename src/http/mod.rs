//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, one task per connection)
//!     → request.rs (parse request line + headers, validate)
//!     → [cache lookup]
//!     → origin.rs (fetch on miss, read until close)
//!     → response.rs (classify, wrap with status line + Cache Hit marker)
//!     → Send to client, close
//! ```

pub mod origin;
pub mod request;
pub mod response;
pub mod server;

pub use origin::{OriginClient, OriginError};
pub use request::{ParsedRequest, RequestError, Target};
pub use response::{CacheStatus, OriginReply, Status};
pub use server::{ConnectionHandler, ProxyServer};
