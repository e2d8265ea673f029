//! Long-running capture loop.

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::CdcResult;
use crate::executor::CaptureExecutor;
use crate::mapper::ChangeMapper;
use crate::sink::CaptureSink;
use crate::source::ChangeSource;

/// Drive `executor` until `shutdown` flips to `true` or it faults.
///
/// While batches come back full the next one is read at once; otherwise the
/// loop sleeps for the configured poll interval. Transient failures are
/// logged and retried after the same sleep.
pub async fn run_capture<S, M, K>(
    executor: &mut CaptureExecutor<S, M, K>,
    mut shutdown: watch::Receiver<bool>,
) -> CdcResult<()>
where
    S: ChangeSource,
    M: ChangeMapper,
    K: CaptureSink,
{
    let object_name = executor.config().object_name.clone();
    let batch_size = executor.config().batch_size;
    let poll_interval = executor.config().poll_interval;

    info!(
        object_name = %object_name,
        batch_size,
        poll_interval_ms = poll_interval.as_millis() as u64,
        "CDC poller starting"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let can_continue = match executor.execute_next(batch_size).await {
            Ok(result) => result.can_continue,
            Err(e) if e.is_transient() => {
                debug!(object_name = %object_name, error = %e, "Capture pass will be retried");
                false
            }
            Err(e) => {
                error!(object_name = %object_name, error = %e, "CDC poller stopping on fault");
                return Err(e);
            }
        };

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
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    info!(object_name = %object_name, "CDC poller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CdcError;
    use crate::executor::{CaptureConfig, ExecutorState};
    use crate::mapper::DefaultChangeMapper;
    use crate::sink::InMemoryCaptureSink;
    use crate::source::{ChangeOperation, InMemoryChangeSource};
    use serde_json::json;
    use std::time::Duration;
    use transactional_outbox::InMemoryOutboxStore;

    fn config() -> CaptureConfig {
        CaptureConfig {
            batch_size: 4,
            poll_interval: Duration::from_millis(10),
            ..CaptureConfig::new("robots")
        }
    }

    #[tokio::test]
    async fn test_poller_drains_and_stops_on_shutdown() {
        let source = InMemoryChangeSource::new();
        for id in 1..=10 {
            source.record("robots", ChangeOperation::Insert, json!(id), Some(json!({})), None);
        }
        source.fail_next(CdcError::Source("connection reset".into()));

        let outbox = InMemoryOutboxStore::new();
        let mut executor = CaptureExecutor::new(
            source,
            DefaultChangeMapper::new("demo"),
            InMemoryCaptureSink::new(outbox.clone()),
            config(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let result = run_capture(&mut executor, shutdown_rx).await;
            (result, executor)
        });

        for _ in 0..200 {
            if outbox.records().len() == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(outbox.records().len(), 10);

        shutdown_tx.send(true).unwrap();
        let (result, executor) = handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(executor.state(), ExecutorState::Idle);
    }

    #[tokio::test]
    async fn test_poller_returns_on_fault() {
        let source = InMemoryChangeSource::new();
        source.record("robots", ChangeOperation::Insert, json!("a.b"), Some(json!({})), None);

        let mut executor = CaptureExecutor::new(
            source,
            DefaultChangeMapper::new("demo"),
            InMemoryCaptureSink::new(InMemoryOutboxStore::new()),
            config(),
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = run_capture(&mut executor, shutdown_rx).await.unwrap_err();
        assert!(matches!(err, CdcError::Conversion { .. }));
        assert_eq!(executor.state(), ExecutorState::Faulted);
    }
}
