//! Retry with exponential backoff
//!
//! Single retry policy for remote calls, replacing the pile of ad hoc
//! fallback fetch mechanisms such flows tend to grow. Retries only
//! recoverable (transport) errors until a total deadline elapses.

use std::time::{Duration, Instant};

use nestling_common::error::Result;

const INITIAL_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 5_000;

/// Retry an operation with exponential backoff until `max_wait_ms`
/// elapses.
///
/// Non-recoverable errors (validation, storage) fail immediately; the
/// last recoverable error is returned once the deadline passes.
pub async fn with_backoff<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_recoverable() {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Giving up: max retry time exceeded"
                    );
                    return Err(err);
                }

                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
