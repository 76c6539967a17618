use crate::{Error, Result};
use models::RetryConfig;
use std::future::Future;

// Cap the exponential factor so long retry tails can't overflow.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Run `attempt` up to `policy.max_attempts` times, sleeping between
/// throttled attempts. A server-suggested retry-after takes precedence over
/// exponential backoff; any non-throttle error, and the final throttle error,
/// surface immediately.
pub async fn with_throttle_retry<T, F, Fut>(
    policy: RetryConfig,
    what: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tried = 0;
    loop {
        tried += 1;
        match attempt().await {
            Err(Error::Throttled { retry_after }) if tried < policy.max_attempts => {
                let delay = retry_after.unwrap_or_else(|| {
                    policy
                        .base_delay
                        .saturating_mul(1 << (tried - 1).min(MAX_BACKOFF_SHIFT))
                });
                tracing::warn!(
                    what,
                    attempt = tried,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    server_hint = retry_after.is_some(),
                    "request throttled; backing off"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(max_attempts: u32, base_ms: u64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_throttling() {
        let calls = AtomicU32::new(0);
        let out = with_throttle_retry(policy(6, 100), "count", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Throttled { retry_after: None })
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_attempt_surfaces_error() {
        let calls = AtomicU32::new(0);
        let err = with_throttle_retry(policy(3, 1), "count", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Throttled { retry_after: None }) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Throttled { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_hint_takes_precedence() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let _ = with_throttle_retry(policy(2, 60_000), "find", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::Throttled {
                        retry_after: Some(Duration::from_millis(25)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;

        // Slept the hinted 25ms, not the 60s exponential delay.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_throttle_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_throttle_retry(policy(6, 1), "sample", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Unsupported) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Unsupported));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
