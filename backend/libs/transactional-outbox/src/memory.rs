//! In-process outbox store.
//!
//! Backs tests and single-process deployments. A [`MemoryTx`] stages records
//! and only makes them visible on [`MemoryTx::commit`]; dropping it discards
//! them, the same way a rolled-back database transaction would. Sequences are
//! assigned at commit, under the same lock that publishes the records.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_envelope::{partition_key, Envelope, ExecutionContext};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::OutboxResult;
use crate::record::{OutboxRecord, PartitionScope, PendingStats};
use crate::store::OutboxStore;

type CommitHook = Box<dyn FnOnce() + Send>;

#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    records: Arc<Mutex<BTreeMap<i64, OutboxRecord>>>,
    next_sequence: Arc<AtomicI64>,
}

/// Unit of work against an [`InMemoryOutboxStore`].
pub struct MemoryTx {
    records: Arc<Mutex<BTreeMap<i64, OutboxRecord>>>,
    next_sequence: Arc<AtomicI64>,
    staged: Vec<OutboxRecord>,
    hooks: Vec<CommitHook>,
}

impl MemoryTx {
    /// Run `hook` when, and only if, this transaction commits. Lets other
    /// in-memory state (such as a capture cursor) commit atomically with the
    /// staged records.
    pub fn on_commit(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    pub fn commit(self) {
        let MemoryTx {
            records,
            next_sequence,
            staged,
            hooks,
        } = self;

        {
            let mut records = records.lock();
            for mut record in staged {
                record.sequence = next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(
                    sequence = record.sequence,
                    event_id = %record.envelope.event_id(),
                    "Outbox record committed"
                );
                records.insert(record.sequence, record);
            }
        }

        for hook in hooks {
            hook();
        }
    }

    pub fn rollback(self) {}
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> MemoryTx {
        MemoryTx {
            records: self.records.clone(),
            next_sequence: self.next_sequence.clone(),
            staged: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Snapshot of every committed record, sent or not, by sequence
    pub fn records(&self) -> Vec<OutboxRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn pending(&self) -> Vec<OutboxRecord> {
        self.records
            .lock()
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    type Tx = MemoryTx;

    async fn enqueue(
        &self,
        tx: &mut Self::Tx,
        ctx: &ExecutionContext,
        envelope: &Envelope,
    ) -> OutboxResult<()> {
        tx.staged.push(OutboxRecord {
            // Assigned on commit
            sequence: 0,
            envelope: envelope.clone(),
            partition_key: partition_key(ctx, envelope),
            enqueued_at_utc: ctx.now(),
            dequeued_at_utc: None,
        });
        debug!(event_id = %envelope.event_id(), "Envelope staged in outbox");
        Ok(())
    }

    async fn dequeue_batch(
        &self,
        scope: &PartitionScope,
        max_count: usize,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.is_pending() && scope.admits(r.partition_key.as_deref()))
            .take(max_count)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, records: &[OutboxRecord]) -> OutboxResult<()> {
        let now = Utc::now();
        let mut stored = self.records.lock();
        for record in records {
            if let Some(entry) = stored.get_mut(&record.sequence) {
                if entry.dequeued_at_utc.is_none() {
                    entry.dequeued_at_utc = Some(now);
                }
            }
        }
        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<PendingStats> {
        let now = Utc::now();
        let records = self.records.lock();
        let pending: Vec<&OutboxRecord> = records.values().filter(|r| r.is_pending()).collect();
        let oldest_age_seconds = pending
            .iter()
            .map(|r| r.enqueued_at_utc)
            .min()
            .map(|oldest| (now - oldest).num_seconds().max(0))
            .unwrap_or(0);

        Ok(PendingStats {
            pending: pending.len() as i64,
            oldest_age_seconds,
        })
    }

    async fn replay_since(&self, since: DateTime<Utc>) -> OutboxResult<u64> {
        let mut replayed = 0;
        for record in self.records.lock().values_mut() {
            if record.enqueued_at_utc >= since && record.dequeued_at_utc.is_some() {
                record.dequeued_at_utc = None;
                replayed += 1;
            }
        }
        Ok(replayed)
    }

    async fn purge_sent(&self, older_than: DateTime<Utc>) -> OutboxResult<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| !matches!(r.dequeued_at_utc, Some(at) if at < older_than));
        Ok((before - records.len()) as u64)
    }
}
