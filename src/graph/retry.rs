//! Exponential backoff shared by Graph page fetches and record store writes.

use crate::error::{GraphError, StoreError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;

    /// Server-requested delay in seconds, if any.
    fn retry_after(&self) -> Option<u64>;
}

impl Retryable for GraphError {
    fn is_transient(&self) -> bool {
        GraphError::is_transient(self)
    }

    fn retry_after(&self) -> Option<u64> {
        GraphError::retry_after(self)
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }

    fn retry_after(&self) -> Option<u64> {
        StoreError::retry_after(self)
    }
}

/// The last error of an operation that never succeeded.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub error: E,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed delay.
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter_factor: 0.25,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, or the server's `Retry-After`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let delay = match retry_after {
            Some(secs) => Duration::from_secs(secs),
            None => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.base_delay.saturating_mul(1u32 << exponent)
            }
        };
        delay.min(self.max_delay)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let range = delay.as_secs_f64() * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(0.0..=range);
        delay + Duration::from_secs_f64(jitter)
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of attempts.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut operation: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_attempts => {
                    let delay = self.with_jitter(self.backoff_delay(attempt, error.retry_after()));
                    log::warn!(
                        "{}: attempt {}/{} failed: {}; retrying in {:?}",
                        label,
                        attempt,
                        self.max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(RetryExhausted {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5)).without_jitter()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(1, None), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2, None), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3, None), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(5, None), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(40, None), Duration::from_secs(10));
    }

    #[test]
    fn retry_after_overrides_but_stays_capped() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(1, Some(7)), Duration::from_secs(7));
        assert_eq!(policy.backoff_delay(1, Some(600)), Duration::from_secs(30));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn transient_failures_use_every_attempt() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = policy(4)
            .run("test", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GraphError::status(StatusCode::SERVICE_UNAVAILABLE, String::new(), None))
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_failures_stop_immediately() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = policy(4)
            .run("test", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::status(StatusCode::UNPROCESSABLE_ENTITY, String::new(), None))
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let result = policy(3)
            .run("test", |attempt| async move {
                if attempt < 2 {
                    Err(GraphError::status(StatusCode::TOO_MANY_REQUESTS, String::new(), None))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }
}
