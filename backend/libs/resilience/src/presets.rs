/// Preset configurations for the pipeline's outbound calls
use crate::invoker::RetryInvoker;
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for one kind of outbound call
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub retry: Option<RetryConfig>,
}

impl ServiceConfig {
    /// Invoker applying this bundle's retry schedule and per-attempt timeout
    pub fn invoker(&self) -> RetryInvoker {
        let retry = self.retry.clone().unwrap_or_else(RetryConfig::none);
        RetryInvoker::new(retry).with_attempt_timeout(self.timeout.duration)
    }
}

/// Event transport sends (Kafka producer)
///
/// - Timeout: 30s per attempt
/// - Retry: 3 retries, 100ms doubling to 5s, with jitter
pub fn transport_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(30),
        },
        retry: Some(RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
    }
}

/// Database reads and commits
///
/// - Timeout: 10s (queries should be fast)
/// - No retry (the caller's loop re-polls)
pub fn database_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        retry: None,
    }
}
