use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::ProviderError;
use crate::transport::RawAwsError;

/// Exponential backoff with an optional jitter, base 1s, capped retry count:
/// a pure delay calculation, a transient-error whitelist, and terminal
/// reclassification on retry exhaustion.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// `delay(attempt) = base * 2^attempt`, optionally jittered by up to
    /// the computed delay's own magnitude to avoid thundering-herd retries.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
        let millis = if self.jitter {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=raw)
        } else {
            raw
        };
        Duration::from_millis(millis)
    }
}

/// Runs `op` under `policy`, retrying transient AWS error codes with
/// exponential backoff. On exhaustion, the last raw error is classified
/// into a terminal `ProviderError` via `ProviderError::classify`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RawAwsError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let transient = ProviderError::is_transient_code(&err.code);
                if !transient || attempt + 1 >= policy.max_attempts {
                    return Err(ProviderError::classify(&err.code, &err.message));
                }
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1000,
            jitter: false,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(1000));
        assert_eq!(policy.delay(1), Duration::from_millis(2000));
        assert_eq!(policy.delay(2), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let policy = RetryPolicy::default();
        let result: Result<u32, ProviderError> = with_retry(&policy, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            jitter: false,
        };
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32, ProviderError> = with_retry(&policy, || {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RawAwsError {
                        code: "RequestLimitExceeded".into(),
                        message: "throttled".into(),
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_error_fails_immediately() {
        let policy = RetryPolicy::default();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32, ProviderError> = with_retry(&policy, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async {
                Err(RawAwsError {
                    code: "InvalidParameterValue".into(),
                    message: "bad param".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Validation(_))));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_transient_retries_reclassify_terminal() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            jitter: false,
        };
        let result: Result<u32, ProviderError> = with_retry(&policy, || async {
            Err(RawAwsError {
                code: "InsufficientInstanceCapacity".into(),
                message: "no capacity".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Capacity(_))));
    }
}
