//! Retry helper for SQLite lock contention.
//!
//! Only `SQLITE_BUSY` / `SQLITE_LOCKED` are retried. Any other failure is
//! returned to the caller on the first attempt.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

/// Backoff settings for busy retries.
#[derive(Debug, Clone, Copy)]
pub struct BusyRetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry; doubled on each further retry.
    pub base_delay: Duration,
    /// Upper bound for a single delay, jitter included.
    pub max_delay: Duration,
}

impl Default for BusyRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl BusyRetryPolicy {
    /// Delay before retry number `attempt` (zero based), with up to 25% jitter.
    fn delay_for(&self, attempt: usize) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let cap_ms = self.max_delay.as_millis() as u64;
        let shift = attempt.min(31) as u32;
        let backoff_ms = base_ms.saturating_mul(1u64 << shift).min(cap_ms);
        let jitter_ms = random::<u64>() % (backoff_ms / 4 + 1);
        Duration::from_millis((backoff_ms + jitter_ms).min(cap_ms))
    }
}

/// Whether an error is transient SQLite lock contention.
pub fn is_sqlite_busy(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    if let sqlx::Error::Database(db_err) = sqlx_err {
        let code = db_err.code().map(Cow::into_owned);
        if matches!(code.as_deref(), Some("5") | Some("6")) {
            return true;
        }
    }

    let msg = sqlx_err.to_string().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Run `op`, retrying while it fails with SQLite lock contention.
pub async fn with_busy_retry<T, F, Fut>(
    op_name: &'static str,
    policy: BusyRetryPolicy,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_sqlite_busy(&err) && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                debug!(
                    op = op_name,
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay = ?delay,
                    "SQLite busy, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn busy_error() -> Error {
        Error::DatabaseSqlx(sqlx::Error::Protocol("database is locked".to_string()))
    }

    fn fast_policy() -> BusyRetryPolicy {
        BusyRetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_busy_detection() {
        assert!(is_sqlite_busy(&busy_error()));
        assert!(!is_sqlite_busy(&Error::validation("nope")));
        assert!(!is_sqlite_busy(&Error::DatabaseSqlx(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = fast_policy();
        for attempt in 0..40 {
            assert!(policy.delay_for(attempt) <= policy.max_delay);
        }
    }

    #[tokio::test]
    async fn test_retries_busy_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = with_busy_retry("test", fast_policy(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy_error())
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_busy_retry("test", fast_policy(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(busy_error())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_busy_retry("test", fast_policy(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
