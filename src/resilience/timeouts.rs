//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap origin connect/read and client reads with a deadline
//! - Report timeouts as their own error, distinct from I/O failures
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timed-out origin fetches surface to the client as a 500

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// An operation did not finish before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {}s", .0.as_secs_f64())]
pub struct TimedOut(pub Duration);

/// Run `fut`, giving up after `limit`.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimedOut(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_limit() {
        let value = with_timeout(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn reports_elapsed_limit() {
        let limit = Duration::from_millis(20);
        let result = with_timeout(limit, tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(TimedOut(limit)));
        assert_eq!(TimedOut(Duration::from_secs(2)).to_string(), "timed out after 2s");
    }
}
