//! Database lock retry
//!
//! SQLite reports write contention as SQLITE_BUSY / "database is locked".
//! Concurrent sweeps and ingestion hooks can hit it on the same user's
//! rows, so write units are retried with exponential backoff until a wall
//! clock budget (`lock_retry_max_wait_ms`) runs out.

use std::future::Future;
use std::time::{Duration, Instant};
use taskmerge_common::Result;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Run `operation` until it succeeds, fails with a non-lock error, or
/// `max_wait_ms` has elapsed.
///
/// **Backoff:** 10ms, doubling per attempt, capped at 1000ms.
///
/// Any error other than a lock error is returned immediately. When the
/// budget is exhausted the last lock error is returned unchanged so callers
/// still see a dependency failure.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut attempt: u32 = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_database_locked() {
            return Err(err);
        }

        let elapsed = started.elapsed();
        if elapsed >= budget {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms,
                "Database still locked, giving up"
            );
            return Err(err);
        }

        let sleep_ms = backoff_ms.min(budget.saturating_sub(elapsed).as_millis() as u64).max(1);
        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = sleep_ms,
            "Database locked, retrying"
        );
        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmerge_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = retry_on_lock("test_op", 100, || async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_non_lock_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = retry_on_lock("test_op", 1000, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::NotFound("missing".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lock_error_retried_until_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = retry_on_lock("test_op", 50, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Database(sqlx::Error::Protocol(
                    "database is locked".into(),
                )))
            }
        })
        .await;

        assert!(result.is_err());
        assert!(calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_lock_error_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_on_lock("test_op", 1000, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Database(sqlx::Error::Protocol(
                        "database is locked".into(),
                    )))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
