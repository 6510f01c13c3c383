//! Shared row-mapping helpers and the bounded write-retry wrapper.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

use crate::domain::ports::DatabaseError;

/// Parse an RFC3339 column value.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(DatabaseError::from)
}

/// Retry a persistent-store write up to three attempts with exponential
/// back-off (1 s base, 2x factor). Permanent errors abort immediately.
pub async fn with_write_retry<T, Fut, F>(mut op: F) -> Result<T, DatabaseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DatabaseError>>,
{
    use backoff::backoff::Backoff;

    let mut policy = backoff::ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        multiplier: 2.0,
        max_interval: Duration::from_secs(4),
        max_elapsed_time: Some(Duration::from_secs(8)),
        ..Default::default()
    };

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempts < 3 => {
                let wait = policy.next_backoff().unwrap_or(Duration::from_secs(1));
                tracing::warn!(attempt = attempts, error = %err, "database write failed, retrying");
                tokio::time::sleep(wait).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn parses_rfc3339() {
        let dt = parse_datetime("2025-06-01T12:00:00+00:00").unwrap();
        assert_eq!(dt.timestamp(), 1_748_779_200);
        assert!(parse_datetime("not a date").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_write_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DatabaseError::ConnectionFailed("busy".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_write_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DatabaseError::ConstraintViolation("unique".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
