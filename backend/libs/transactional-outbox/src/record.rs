//! Outbox record and dequeue scoping.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use event_envelope::Envelope;
use serde::{Deserialize, Serialize};

/// Durable pending-send unit, written in the same transaction as the business
/// mutation that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Store-assigned, monotonically increasing; defines send order
    pub sequence: i64,
    pub envelope: Envelope,
    /// `None` leaves the record unkeyed (round-robin on the transport)
    pub partition_key: Option<String>,
    pub enqueued_at_utc: DateTime<Utc>,
    /// Set once the record has been sent; `None` while pending
    pub dequeued_at_utc: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn is_pending(&self) -> bool {
        self.dequeued_at_utc.is_none()
    }
}

/// Which pending records a dequeue worker may see.
///
/// Ordering is only guaranteed inside a partition, so concurrent workers must
/// split the outbox by partition key and never share one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PartitionScope {
    /// Every pending record. Only safe with a single worker.
    #[default]
    All,
    /// One partition key
    Key(String),
    /// Records with no partition key
    Unkeyed,
    /// Hash shard `index` of `count`. Unkeyed records belong to shard 0.
    Shard { index: u32, count: u32 },
}

impl PartitionScope {
    /// In-process shard assignment used by the in-memory store
    pub(crate) fn admits(&self, partition_key: Option<&str>) -> bool {
        match self {
            PartitionScope::All => true,
            PartitionScope::Key(key) => partition_key == Some(key.as_str()),
            PartitionScope::Unkeyed => partition_key.is_none(),
            PartitionScope::Shard { index, count } => {
                let count = (*count).max(1);
                match partition_key {
                    None => *index == 0,
                    Some(key) => {
                        let mut hasher = DefaultHasher::new();
                        key.hash(&mut hasher);
                        (hasher.finish() % count as u64) as u32 == *index
                    }
                }
            }
        }
    }
}

/// Backlog summary for metrics and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingStats {
    pub pending: i64,
    /// Age of the oldest pending record; 0 when nothing is pending
    pub oldest_age_seconds: i64,
}

/// Split records into runs sharing a partition key, in order of each key's
/// first appearance. Relative order inside a run is preserved.
pub fn group_by_partition(records: Vec<OutboxRecord>) -> Vec<(Option<String>, Vec<OutboxRecord>)> {
    let mut groups: Vec<(Option<String>, Vec<OutboxRecord>)> = Vec::new();
    for record in records {
        match groups
            .iter_mut()
            .find(|(key, _)| *key == record.partition_key)
        {
            Some((_, group)) => group.push(record),
            None => groups.push((record.partition_key.clone(), vec![record])),
        }
    }
    groups
}
