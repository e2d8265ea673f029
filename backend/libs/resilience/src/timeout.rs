/// Timeout wrappers for async operations
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Operation timed out after {0:?}")]
pub struct Elapsed(pub Duration);

/// Execute a future with timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    timeout(duration, future).await.map_err(|_| Elapsed(duration))
}

/// Execute a fallible future with timeout, folding an expiry into the
/// operation's own error type
pub async fn with_timeout_result<F, T, E>(duration: Duration, future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Elapsed>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(E::from(Elapsed(duration))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum OpError {
        Failed(&'static str),
        TimedOut(Duration),
    }

    impl From<Elapsed> for OpError {
        fn from(e: Elapsed) -> Self {
            OpError::TimedOut(e.0)
        }
    }

    #[tokio::test]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapsed() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert_eq!(result, Err(Elapsed(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_timeout_result_keeps_operation_error() {
        let result: Result<i32, OpError> = with_timeout_result(Duration::from_secs(1), async {
            Err(OpError::Failed("broker unavailable"))
        })
        .await;

        assert_eq!(result, Err(OpError::Failed("broker unavailable")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_result_maps_expiry() {
        let result: Result<i32, OpError> = with_timeout_result(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(1)
        })
        .await;

        assert_eq!(result, Err(OpError::TimedOut(Duration::from_millis(5))));
    }
}
