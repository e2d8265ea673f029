/// Resilience primitives for the event pipeline
///
/// - **Retry**: Exponential backoff with jitter for transient failures
/// - **Timeout**: Per-call deadlines
/// - **Invoker**: Bounded retry plus per-attempt deadline around one operation
/// - **Redelivery**: Transport redelivery budget and its poison-threshold check
/// - **Preset Configurations**: Pre-tuned settings for transport sends and database calls
///
/// # Example: Transport send with bounded retry
///
/// ```rust,no_run
/// use resilience::{presets, Elapsed, Retryable};
///
/// #[derive(Debug)]
/// struct SendError;
///
/// impl std::fmt::Display for SendError {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("send failed")
///     }
/// }
///
/// impl Retryable for SendError {
///     fn is_retryable(&self) -> bool {
///         true
///     }
/// }
///
/// impl From<Elapsed> for SendError {
///     fn from(_: Elapsed) -> Self {
///         SendError
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let invoker = presets::transport_config().invoker();
///     let _ = invoker.invoke(|| async { Ok::<_, SendError>(()) }).await;
/// }
/// ```

pub mod invoker;
pub mod presets;
pub mod redelivery;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use invoker::{RetryInvoker, Retryable};
pub use presets::{database_config, transport_config, ServiceConfig};
pub use redelivery::{PolicyAlignment, RedeliveryPolicy};
pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, Elapsed, TimeoutConfig};
