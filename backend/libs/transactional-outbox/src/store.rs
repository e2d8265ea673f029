//! Storage boundary of the outbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_envelope::{Envelope, ExecutionContext};

use crate::error::OutboxResult;
use crate::record::{OutboxRecord, PartitionScope, PendingStats};

/// Durable, ordered outbox.
///
/// `enqueue` runs inside the caller's transaction so the record commits or
/// rolls back together with the business write. Everything else runs on the
/// store's own connections.
///
/// Within one partition key, sequences follow commit order: a record that
/// commits later never carries a lower sequence than one already visible.
/// Dequeuing by ascending sequence therefore never overtakes a record of the
/// same key that has yet to commit.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Transaction handle the business write is already using
    type Tx: Send;

    /// Record `envelope` inside `tx`. The partition key is derived from
    /// `ctx` and the envelope.
    async fn enqueue(
        &self,
        tx: &mut Self::Tx,
        ctx: &ExecutionContext,
        envelope: &Envelope,
    ) -> OutboxResult<()>;

    /// Pending records in `scope`, ascending by sequence.
    async fn dequeue_batch(
        &self,
        scope: &PartitionScope,
        max_count: usize,
    ) -> OutboxResult<Vec<OutboxRecord>>;

    /// Flag `records` as sent. Callers pass records in the order they were
    /// dequeued.
    async fn mark_sent(&self, records: &[OutboxRecord]) -> OutboxResult<()>;

    async fn pending_stats(&self) -> OutboxResult<PendingStats>;

    /// Return records enqueued at or after `since` to pending.
    async fn replay_since(&self, since: DateTime<Utc>) -> OutboxResult<u64>;

    /// Delete sent records dequeued before `older_than`.
    async fn purge_sent(&self, older_than: DateTime<Utc>) -> OutboxResult<u64>;
}
