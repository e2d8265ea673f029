//! Partitioned publishing with bounded retry.

use std::sync::Arc;

use async_trait::async_trait;
use event_envelope::{batch_partition_key, partition_key, Envelope, ExecutionContext};
use resilience::{presets, RetryError, RetryInvoker};
use tracing::{debug, error, info};

use crate::error::{OutboxError, OutboxResult, TransportError};
use crate::metrics::OutboxMetrics;

/// Egress transport boundary.
///
/// One call carries envelopes for a single partition key and must deliver
/// them in slice order. `None` leaves partition choice to the transport.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(
        &self,
        batch: &[Envelope],
        partition_key: Option<&str>,
    ) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: EventTransport + ?Sized> EventTransport for Arc<T> {
    async fn send(
        &self,
        batch: &[Envelope],
        partition_key: Option<&str>,
    ) -> Result<(), TransportError> {
        (**self).send(batch, partition_key).await
    }
}

/// How [`EventPublisher::send`] assigns partition keys to a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Grouping {
    /// Each envelope uses the tenant id or its own key
    #[default]
    PerEnvelope,
    /// The whole batch uses the tenant id or the first envelope's key
    FirstEnvelope,
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub invoker: RetryInvoker,
    pub grouping: Grouping,
    /// Log and drop a batch whose retries are exhausted instead of failing.
    ///
    /// **A swallowed batch is lost.** The dequeue worker sees success and marks
    /// the outbox records sent, so nothing will ever retry them. Only enable
    /// this where liveness of the stream matters more than delivering every
    /// event.
    pub swallow_exception: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            invoker: presets::transport_config().invoker(),
            grouping: Grouping::default(),
            swallow_exception: false,
        }
    }
}

/// Sends envelope batches to a transport, one transport call per partition
/// key, each wrapped in the configured retry invoker.
pub struct EventPublisher<T: EventTransport> {
    transport: T,
    config: PublisherConfig,
    metrics: Option<OutboxMetrics>,
}

impl<T: EventTransport> EventPublisher<T> {
    pub fn new(transport: T, config: PublisherConfig) -> Self {
        Self {
            transport,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Group `batch` by partition key and send each group.
    ///
    /// Groups go out in order of their first envelope; the first failing
    /// group stops the send and its error is returned (unless swallowed).
    pub async fn send(&self, ctx: &ExecutionContext, batch: &[Envelope]) -> OutboxResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        match self.config.grouping {
            Grouping::FirstEnvelope => {
                let key = batch_partition_key(ctx, batch);
                self.send_partition(key.as_deref(), batch).await
            }
            Grouping::PerEnvelope => {
                let mut groups: Vec<(Option<String>, Vec<Envelope>)> = Vec::new();
                for envelope in batch {
                    let key = partition_key(ctx, envelope);
                    match groups.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, group)) => group.push(envelope.clone()),
                        None => groups.push((key, vec![envelope.clone()])),
                    }
                }

                for (key, group) in &groups {
                    self.send_partition(key.as_deref(), group).await?;
                }
                Ok(())
            }
        }
    }

    /// Send envelopes that already share `partition_key` as one transport call.
    pub async fn send_partition(
        &self,
        partition_key: Option<&str>,
        batch: &[Envelope],
    ) -> OutboxResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let result = self
            .config
            .invoker
            .invoke(|| self.transport.send(batch, partition_key))
            .await;

        match result {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.published.inc_by(batch.len() as u64);
                }
                debug!(
                    partition_key = ?partition_key,
                    count = batch.len(),
                    "Batch sent to transport"
                );
                Ok(())
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.send_failures.inc();
                }
                let attempts = match &err {
                    RetryError::MaxRetriesExceeded { retries, .. } => retries + 1,
                    RetryError::NonRetryable(_) => 1,
                };
                let source = err.into_inner();

                if self.config.swallow_exception {
                    error!(
                        partition_key = ?partition_key,
                        count = batch.len(),
                        first_event_id = %batch[0].event_id(),
                        attempts,
                        error = %source,
                        "Publish failed and was swallowed; batch is lost"
                    );
                    return Ok(());
                }

                info!(
                    partition_key = ?partition_key,
                    count = batch.len(),
                    attempts,
                    error = %source,
                    "Publish failed; records stay pending"
                );
                Err(OutboxError::PublishFailed {
                    partition_key: partition_key.map(str::to_owned),
                    source,
                })
            }
        }
    }
}
