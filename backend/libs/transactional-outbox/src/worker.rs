//! Dequeue worker: drains the outbox into the publisher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::OutboxResult;
use crate::metrics::OutboxMetrics;
use crate::publisher::{EventPublisher, EventTransport};
use crate::record::{group_by_partition, PartitionScope};
use crate::store::OutboxStore;

#[derive(Debug, Clone)]
pub struct DequeueConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// Records this worker owns. Workers running at the same time must have
    /// disjoint scopes.
    pub scope: PartitionScope,
}

impl Default for DequeueConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            scope: PartitionScope::All,
        }
    }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub dequeued: usize,
    pub sent: usize,
    /// Records left pending because their partition failed to publish
    pub deferred: usize,
}

/// Single worker per partition scope.
///
/// Each pass reads pending records in sequence order, publishes them one
/// partition at a time, and marks a partition's records sent only after its
/// publish succeeded. A failed partition is left untouched and retried on
/// the next pass; other partitions in the same pass are unaffected.
pub struct DequeueWorker<S: OutboxStore, T: EventTransport> {
    store: Arc<S>,
    publisher: Arc<EventPublisher<T>>,
    config: DequeueConfig,
    metrics: Option<OutboxMetrics>,
}

impl<S: OutboxStore, T: EventTransport> DequeueWorker<S, T> {
    pub fn new(store: Arc<S>, publisher: Arc<EventPublisher<T>>, config: DequeueConfig) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics: None,
        }
    }

    /// Also refresh backlog gauges after every pass.
    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn drain_once(&self) -> OutboxResult<DrainReport> {
        let records = self
            .store
            .dequeue_batch(&self.config.scope, self.config.batch_size)
            .await?;

        let mut report = DrainReport {
            dequeued: records.len(),
            ..Default::default()
        };

        for (partition_key, group) in group_by_partition(records) {
            let envelopes: Vec<_> = group.iter().map(|r| r.envelope.clone()).collect();

            if let Err(e) = self
                .publisher
                .send_partition(partition_key.as_deref(), &envelopes)
                .await
            {
                warn!(
                    partition_key = ?partition_key,
                    first_sequence = group[0].sequence,
                    count = group.len(),
                    error = %e,
                    "Partition publish failed, will retry next pass"
                );
                report.deferred += group.len();
                continue;
            }

            match self.store.mark_sent(&group).await {
                Ok(()) => report.sent += group.len(),
                Err(e) => {
                    // Delivered but still pending: the next pass sends it again.
                    error!(
                        partition_key = ?partition_key,
                        first_sequence = group[0].sequence,
                        error = ?e,
                        "Failed to mark outbox records as sent"
                    );
                    report.deferred += group.len();
                }
            }
        }

        Ok(report)
    }

    /// Drain until `shutdown` flips to `true`.
    ///
    /// A full, fully-sent batch means more may be waiting, so the next pass
    /// starts at once; otherwise the worker sleeps for the poll interval.
    /// Shutdown is only observed between passes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> OutboxResult<()> {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            scope = ?self.config.scope,
            "Outbox dequeue worker starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let can_continue = match self.drain_once().await {
                Ok(report) => {
                    if report.sent > 0 {
                        info!(
                            sent = report.sent,
                            deferred = report.deferred,
                            "Published records from outbox"
                        );
                    } else {
                        debug!("No outbox records published");
                    }
                    report.dequeued > 0
                        && report.dequeued == self.config.batch_size
                        && report.deferred == 0
                }
                Err(e) => {
                    error!(error = ?e, transient = e.is_transient(), "Outbox dequeue error");
                    false
                }
            };

            if let Some(metrics) = &self.metrics {
                match self.store.pending_stats().await {
                    Ok(stats) => metrics.observe_stats(stats),
                    Err(e) => debug!(error = %e, "Failed to read outbox pending stats"),
                }
            }

            if can_continue {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Outbox dequeue worker stopped");
        Ok(())
    }
}
