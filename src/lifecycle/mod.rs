//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Parse CLI → Load config → Validate → Init logging/metrics → Bind → Run
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Let in-flight connections finish → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Shutdown has timeout: in-flight connections get a bounded grace period

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
