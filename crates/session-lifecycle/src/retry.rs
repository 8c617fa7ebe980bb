//! Bounded exponential backoff shared by initialization and token refresh.

use crate::error::{AuthError, AuthResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: u32,
    /// Cap for ordinary failures.
    pub max_delay: Duration,
    /// Total attempts per operation cycle.
    pub max_retries: u32,
    /// Cap for rate limited failures without a provider hint.
    pub rate_limit_max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2,
            max_delay: Duration::from_millis(10_000),
            max_retries: 3,
            rate_limit_max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    fn exponential(&self, attempt: u32, cap: Duration) -> Duration {
        let base_ms = self.initial_delay.as_millis() as u64;
        let cap_ms = cap.as_millis() as u64;
        let multiplier = u64::from(self.backoff_factor)
            .checked_pow(attempt)
            .unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(multiplier).min(cap_ms))
    }

    /// Delay after the 0-indexed `attempt` failed with an ordinary error.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.exponential(attempt, self.max_delay)
    }

    /// Delay after `attempt` failed with `error`.
    ///
    /// Rate limited failures honour the provider's hint when present and
    /// otherwise back off up to `rate_limit_max_delay`.
    pub fn delay_after(&self, attempt: u32, error: &AuthError) -> Duration {
        if error.is_rate_limited() {
            return error
                .retry_after()
                .unwrap_or_else(|| self.exponential(attempt, self.rate_limit_max_delay));
        }
        self.next_delay(attempt)
    }

    /// Run `attempt_fn` until it succeeds, fails with a non-retryable error,
    /// or `max_retries` attempts have failed.
    ///
    /// `attempt_fn` receives the 0-indexed attempt number. Exhaustion yields
    /// [`AuthError::RetriesExhausted`] wrapping the last failure.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> AuthResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0;

        loop {
            let error = match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(operation, attempt = attempt + 1, error = %error, "Non-retryable failure");
                return Err(error);
            }

            if attempt + 1 >= attempts {
                warn!(operation, attempts, error = %error, "Retries exhausted");
                return Err(AuthError::RetriesExhausted {
                    operation,
                    attempts,
                    last: Box::new(error),
                });
            }

            let delay = self.delay_after(attempt, &error);
            debug!(
                operation,
                attempt = attempt + 1,
                max_retries = attempts,
                delay_ms = delay.as_millis() as u64,
                rate_limited = error.is_rate_limited(),
                "Retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_next_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.next_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(2), Duration::from_millis(4000));
        assert_eq!(policy.next_delay(3), Duration::from_millis(8000));
        assert_eq!(policy.next_delay(4), Duration::from_millis(10_000));
        assert_eq!(policy.next_delay(60), Duration::from_millis(10_000));
    }

    #[test]
    fn test_rate_limit_prefers_provider_hint() {
        let policy = RetryPolicy::default();
        let hinted = AuthError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(policy.delay_after(0, &hinted), Duration::from_secs(7));
    }

    #[test]
    fn test_rate_limit_without_hint_uses_wider_cap() {
        let policy = RetryPolicy::default();
        let bare = AuthError::RateLimited { retry_after: None };
        assert_eq!(policy.delay_after(0, &bare), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(4, &bare), Duration::from_millis(16_000));
        assert_eq!(policy.delay_after(5, &bare), Duration::from_millis(30_000));
        // An ordinary failure at the same attempt stays under the normal cap.
        assert_eq!(
            policy.delay_after(5, &AuthError::NetworkUnavailable),
            Duration::from_millis(10_000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_after_transient_failures() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = policy
            .run("get session", move |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(AuthError::NetworkUnavailable)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_non_retryable() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AuthResult<()> = policy
            .run("token refresh", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AuthError::InvalidGrant("revoked".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(AuthError::InvalidGrant(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exhausts_after_max_retries() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AuthResult<()> = policy
            .run("token refresh", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AuthError::Timeout)
                }
            })
            .await;

        match result {
            Err(AuthError::RetriesExhausted {
                operation,
                attempts,
                last,
            }) => {
                assert_eq!(operation, "token refresh");
                assert_eq!(attempts, 3);
                assert!(matches!(*last, AuthError::Timeout));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_between_attempts() {
        let policy = RetryPolicy::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let start = tokio::time::Instant::now();

        let _: AuthResult<()> = policy
            .run("get session", move |_| {
                log.lock().push(start.elapsed());
                async { Err(AuthError::NetworkUnavailable) }
            })
            .await;

        assert_eq!(
            *seen.lock(),
            vec![
                Duration::ZERO,
                Duration::from_millis(1000),
                Duration::from_millis(3000)
            ]
        );
    }
}
