//! One-batch-at-a-time capture executor.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use resilience::with_timeout_result;
use tracing::{debug, error, info, warn};

use crate::cursor::CdcCursor;
use crate::error::{CdcError, CdcResult};
use crate::mapper::{ChangeMapper, MappedChange};
use crate::sink::CaptureSink;
use crate::source::ChangeSource;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Watched table or view
    pub object_name: String,
    pub batch_size: usize,
    /// Sleep between passes once the source is drained
    pub poll_interval: Duration,
    /// Upper bound on a single source read
    pub read_timeout: Duration,
}

impl CaptureConfig {
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            read_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Polling,
    Converting,
    Committing,
    /// Stopped on an error that retrying would repeat; needs [`CaptureExecutor::reset`]
    Faulted,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Polling => "polling",
            ExecutorState::Converting => "converting",
            ExecutorState::Committing => "committing",
            ExecutorState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Outcome of one [`CaptureExecutor::execute_next`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdcBatchResult {
    pub records_read: usize,
    /// The batch came back full, so more changes are likely waiting
    pub can_continue: bool,
    /// Cursor after the batch (unchanged when nothing was read)
    pub cursor: CdcCursor,
}

/// Moves changes of one object from a [`ChangeSource`] into the outbox.
///
/// Each call reads at most one batch after the stored cursor, converts it,
/// and commits envelopes plus the advanced cursor atomically. On any failure
/// nothing is committed and the cursor stays put, so the same window is read
/// again next time.
pub struct CaptureExecutor<S, M, K> {
    source: S,
    mapper: M,
    sink: K,
    config: CaptureConfig,
    state: ExecutorState,
    fault: Option<String>,
}

impl<S, M, K> CaptureExecutor<S, M, K>
where
    S: ChangeSource,
    M: ChangeMapper,
    K: CaptureSink,
{
    pub fn new(source: S, mapper: M, sink: K, config: CaptureConfig) -> Self {
        Self {
            source,
            mapper,
            sink,
            config,
            state: ExecutorState::Idle,
            fault: None,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Why the executor faulted, if it did
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Clear a fault after the operator fixed its cause.
    pub fn reset(&mut self) {
        if self.state == ExecutorState::Faulted {
            info!(
                object_name = %self.config.object_name,
                fault = ?self.fault,
                "Capture executor reset"
            );
        }
        self.state = ExecutorState::Idle;
        self.fault = None;
    }

    /// Capture the next batch of at most `batch_size` changes.
    pub async fn execute_next(&mut self, batch_size: usize) -> CdcResult<CdcBatchResult> {
        if self.state == ExecutorState::Faulted {
            return Err(CdcError::Faulted(
                self.fault.clone().unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        let object_name = self.config.object_name.clone();

        self.state = ExecutorState::Polling;
        let cursor = match self.sink.load_cursor(&object_name).await {
            Ok(cursor) => cursor,
            Err(e) => return Err(self.settle(e)),
        };

        if batch_size == 0 {
            self.state = ExecutorState::Idle;
            return Ok(CdcBatchResult {
                records_read: 0,
                can_continue: false,
                cursor,
            });
        }

        let read = with_timeout_result(
            self.config.read_timeout,
            self.source
                .read_changes(&object_name, cursor.last_position, batch_size),
        )
        .await;
        let rows = match read {
            Ok(rows) => rows,
            Err(e) => return Err(self.settle(e)),
        };

        let records_read = rows.len();
        if records_read == 0 {
            self.state = ExecutorState::Idle;
            debug!(object_name = %object_name, position = %cursor.last_position, "No new changes");
            return Ok(CdcBatchResult {
                records_read,
                can_continue: false,
                cursor,
            });
        }

        self.state = ExecutorState::Converting;
        let mut previous = cursor.last_position;
        let mut changes: Vec<MappedChange> = Vec::with_capacity(records_read);
        for row in &rows {
            if row.position <= previous {
                return Err(self.settle(CdcError::OutOfOrder {
                    previous: previous.value(),
                    position: row.position.value(),
                }));
            }
            previous = row.position;

            match self.mapper.map(row) {
                Ok(change) => changes.push(change),
                Err(e) => return Err(self.settle(e)),
            }
        }

        self.state = ExecutorState::Committing;
        let next = cursor.advanced_to(previous, Utc::now());
        if let Err(e) = self.sink.commit_batch(&cursor, &next, &changes).await {
            return Err(self.settle(e));
        }

        self.state = ExecutorState::Idle;
        let can_continue = records_read == batch_size;
        info!(
            object_name = %object_name,
            records_read,
            from = %cursor.last_position,
            to = %next.last_position,
            can_continue,
            "Captured change batch"
        );

        Ok(CdcBatchResult {
            records_read,
            can_continue,
            cursor: next,
        })
    }

    /// Leave the in-flight state after a failure: back to idle when the same
    /// window can be retried, faulted otherwise.
    fn settle(&mut self, err: CdcError) -> CdcError {
        if err.is_transient() {
            warn!(
                object_name = %self.config.object_name,
                stage = %self.state,
                error = %err,
                "Capture pass failed, cursor unchanged"
            );
            self.state = ExecutorState::Idle;
        } else {
            error!(
                object_name = %self.config.object_name,
                stage = %self.state,
                error = %err,
                "Capture executor faulted"
            );
            self.state = ExecutorState::Faulted;
            self.fault = Some(err.to_string());
        }
        err
    }
}
