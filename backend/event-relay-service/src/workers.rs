//! Background tasks: one capture poller per watched object, the outbox
//! dequeue workers, and periodic retention cleanup.

use std::sync::Arc;
use std::time::Duration;

use cdc_capture::{
    run_capture, CaptureConfig, CaptureExecutor, DefaultChangeMapper, SqlxCaptureSink,
    SqlxChangeSource,
};
use chrono::Utc;
use sqlx::PgPool;
use subscriber_host::SqlxProcessedEvents;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use transactional_outbox::{
    DequeueConfig, DequeueWorker, EventPublisher, EventTransport, OutboxMetrics, OutboxStore,
    SqlxOutboxStore,
};

use crate::config::RelaySettings;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Spawn a capture poller for every object in `relay.cdc_objects`.
///
/// A poller that faults stops on its own and leaves the others running; the
/// fault needs an operator before that object is captured again.
pub fn spawn_capture_pollers(
    pool: &PgPool,
    relay: &RelaySettings,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    relay
        .cdc_objects
        .iter()
        .map(|object_name| {
            let config = CaptureConfig {
                batch_size: relay.cdc_batch_size,
                poll_interval: Duration::from_millis(relay.cdc_poll_interval_ms),
                ..CaptureConfig::new(object_name.clone())
            };
            let mut executor = CaptureExecutor::new(
                SqlxChangeSource::new(pool.clone()),
                DefaultChangeMapper::new(relay.subject_prefix.clone()),
                SqlxCaptureSink::new(SqlxOutboxStore::new(pool.clone())),
                config,
            );
            let shutdown = shutdown.clone();
            let object_name = object_name.clone();

            tokio::spawn(async move {
                if let Err(e) = run_capture(&mut executor, shutdown).await {
                    error!(
                        object_name = %object_name,
                        state = %executor.state(),
                        fault = ?executor.fault(),
                        error = %e,
                        "Capture poller stopped; the object is no longer captured"
                    );
                }
            })
        })
        .collect()
}

/// Spawn one dequeue worker per partition scope. Scopes are disjoint, so
/// each partition key is drained by exactly one worker.
pub fn spawn_dequeue_workers<T>(
    store: Arc<SqlxOutboxStore>,
    publisher: Arc<EventPublisher<T>>,
    relay: &RelaySettings,
    metrics: Option<OutboxMetrics>,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>>
where
    T: EventTransport + 'static,
{
    relay
        .outbox_scopes()
        .into_iter()
        .map(|scope| {
            let mut worker = DequeueWorker::new(
                store.clone(),
                publisher.clone(),
                DequeueConfig {
                    batch_size: relay.outbox_batch_size,
                    poll_interval: Duration::from_millis(relay.outbox_poll_interval_ms),
                    scope,
                },
            );
            if let Some(metrics) = &metrics {
                worker = worker.with_metrics(metrics.clone());
            }
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                if let Err(e) = worker.run(shutdown).await {
                    error!(error = %e, "Outbox dequeue worker failed");
                }
            })
        })
        .collect()
}

/// Hourly: forget processed event ids past retention and purge outbox
/// records sent before the same cutoff.
pub fn spawn_retention_cleanup(
    processed: SqlxProcessedEvents,
    store: Arc<SqlxOutboxStore>,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match processed.cleanup_old_events().await {
                        Ok(deleted) => info!(deleted, "Processed event ids cleaned up"),
                        Err(e) => warn!(error = %e, "Processed event cleanup failed"),
                    }

                    let cutoff = chrono::Duration::from_std(retention)
                        .map(|retention| Utc::now() - retention);
                    match cutoff {
                        Ok(cutoff) => match store.purge_sent(cutoff).await {
                            Ok(purged) => info!(purged, "Sent outbox records purged"),
                            Err(e) => warn!(error = %e, "Outbox purge failed"),
                        },
                        Err(e) => warn!(error = %e, "Retention out of range, outbox purge skipped"),
                    }
                }
            }
        }
    })
}
