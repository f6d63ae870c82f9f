//! Bounded retry with exponential backoff for external calls
//!
//! Each call gets its own attempt counter and delay; nothing is shared
//! between calls. Errors decide for themselves whether another attempt can
//! help through [`Retryable`].

use std::future::Future;
use std::time::Duration;

/// Classification of an error as transient or fatal
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// The delay starts at `initial_delay` and doubles after every failed
    /// attempt. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delay = self.initial_delay;
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    tracing::error!(
                        operation,
                        attempt,
                        error = %e,
                        "{} failed with a non-retryable error",
                        operation
                    );
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(
                        operation,
                        attempt,
                        error = %e,
                        "{} failed after {} attempts",
                        operation,
                        max_attempts
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %e,
                        "{} failed, retrying in {:?} (attempt {}/{})",
                        operation,
                        delay,
                        attempt,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

/// Transient HTTP statuses: request timeout, throttling, server errors
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_try_without_delay() {
        let start = Instant::now();
        let result: Result<u32, TestError> = policy().run("op", || async { Ok(7) }).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_attempt_success_waits_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result: Result<&str, TestError> = policy()
            .run("op", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError::Transient)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_backs_off_exponentially() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result: Result<(), TestError> = policy()
            .run("op", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            })
            .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s between three attempts, no sleep after the last one
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result: Result<(), TestError> = policy()
            .run("op", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), TestError> = RetryPolicy::new(0, Duration::from_secs(1))
            .run("op", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(408));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(400));
    }
}
