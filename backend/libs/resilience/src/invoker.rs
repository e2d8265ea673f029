//! Bounded retry around a single outbound operation.

use std::future::Future;
use std::time::Duration;

use crate::retry::{with_retry_if, RetryConfig, RetryError};
use crate::timeout::{with_timeout_result, Elapsed};

/// Errors that know whether another attempt may succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Applies a retry schedule and an optional per-attempt deadline to an
/// operation. Every attempt gets a fresh deadline.
#[derive(Debug, Clone, Default)]
pub struct RetryInvoker {
    retry: RetryConfig,
    attempt_timeout: Option<Duration>,
}

impl RetryInvoker {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            attempt_timeout: None,
        }
    }

    /// A single attempt with no deadline
    pub fn once() -> Self {
        Self::new(RetryConfig::none())
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    pub async fn invoke<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + From<Elapsed> + std::fmt::Display,
    {
        let deadline = self.attempt_timeout;
        with_retry_if(
            self.retry.clone(),
            || {
                let attempt = operation();
                async move {
                    match deadline {
                        Some(duration) => with_timeout_result(duration, attempt).await,
                        None => attempt.await,
                    }
                }
            },
            E::is_retryable,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    enum SendError {
        #[error("broker unavailable")]
        Unavailable,
        #[error("message too large")]
        TooLarge,
        #[error("timed out")]
        TimedOut,
    }

    impl Retryable for SendError {
        fn is_retryable(&self) -> bool {
            !matches!(self, SendError::TooLarge)
        }
    }

    impl From<Elapsed> for SendError {
        fn from(_: Elapsed) -> Self {
            SendError::TimedOut
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = RetryInvoker::new(fast())
            .invoke(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SendError::Unavailable)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = RetryInvoker::new(fast())
            .invoke(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(SendError::TooLarge) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable(SendError::TooLarge))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_gets_a_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = RetryInvoker::new(fast())
            .with_attempt_timeout(Duration::from_millis(50))
            .invoke(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }
            })
            .await;

        match result {
            Err(RetryError::MaxRetriesExceeded { last_error, .. }) => {
                assert!(matches!(last_error, SendError::TimedOut))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_once_makes_a_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let _: Result<(), _> = RetryInvoker::once()
            .invoke(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(SendError::Unavailable) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
