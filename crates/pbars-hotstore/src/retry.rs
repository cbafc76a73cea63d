//! Bounded retry helpers for the two recoverable error kinds in §7:
//! `Conflict` (lost a CAS race) and `StoreUnavailable` (transient I/O).

use pbars_errors::PbarsError;
use std::future::Future;
use std::time::Duration;

/// Retries `op` up to `max_attempts` times with capped exponential backoff,
/// doubling `base_delay` each attempt up to `max_delay`. On exhaustion,
/// returns the last error produced by `op` unchanged — callers should only
/// pass in operations that fail with `Conflict` or `StoreUnavailable`.
pub async fn retry_with_backoff<F, Fut, T>(
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    mut op: F,
) -> Result<T, PbarsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PbarsError>>,
{
    let mut attempt = 0;
    let mut delay = base_delay;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::debug!(attempt, %err, "retrying after recoverable error");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}
