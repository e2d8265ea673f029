//! PostgreSQL outbox store.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_envelope::{partition_key, Envelope, ExecutionContext};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};

use crate::error::OutboxResult;
use crate::record::{OutboxRecord, PartitionScope, PendingStats};
use crate::store::OutboxStore;

const SELECT_PENDING: &str = r#"
    SELECT sequence, payload, partition_key, enqueued_at_utc, dequeued_at_utc
    FROM outbox_records
    WHERE dequeued_at_utc IS NULL
"#;

/// SQLx-based outbox store over the `outbox_records` table.
///
/// `sequence` is a `BIGSERIAL` taken by an insert trigger only after it holds
/// a transaction-scoped advisory lock on the row's partition key. Writers of
/// one key are thereby serialized until commit, so sequences of a key follow
/// commit order. Two transactions locking the same keys in opposite order
/// deadlock; Postgres aborts one of them and the caller retries.
///
/// The envelope is stored whole as JSONB in `payload`, with `subject` and
/// `action` copied out for operator queries.
#[derive(Clone)]
pub struct SqlxOutboxStore {
    pool: PgPool,
}

impl SqlxOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction for a business write plus its outbox records.
    pub async fn begin(&self) -> OutboxResult<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Return records in the inclusive sequence range to pending, for
    /// operational backfill.
    pub async fn replay_range(&self, from_sequence: i64, to_sequence: i64) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_records
            SET dequeued_at_utc = NULL
            WHERE sequence BETWEEN $1 AND $2
              AND dequeued_at_utc IS NOT NULL
            "#,
        )
        .bind(from_sequence)
        .bind(to_sequence)
        .execute(&self.pool)
        .await
        .context("Failed to replay outbox records by sequence range")?;

        Ok(res.rows_affected())
    }
}

fn parse_record(row: PgRow) -> OutboxResult<OutboxRecord> {
    let payload: serde_json::Value = row.try_get("payload")?;
    let envelope: Envelope = serde_json::from_value(payload)?;
    Ok(OutboxRecord {
        sequence: row.try_get("sequence")?,
        envelope,
        partition_key: row.try_get("partition_key")?,
        enqueued_at_utc: row.try_get("enqueued_at_utc")?,
        dequeued_at_utc: row.try_get("dequeued_at_utc")?,
    })
}

#[async_trait]
impl OutboxStore for SqlxOutboxStore {
    type Tx = Transaction<'static, Postgres>;

    async fn enqueue(
        &self,
        tx: &mut Self::Tx,
        ctx: &ExecutionContext,
        envelope: &Envelope,
    ) -> OutboxResult<()> {
        let key = partition_key(ctx, envelope);
        let payload = serde_json::to_value(envelope)?;

        let row = sqlx::query(
            r#"
            INSERT INTO outbox_records (
                event_id,
                subject,
                action,
                payload,
                partition_key,
                enqueued_at_utc
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING sequence
            "#,
        )
        .bind(envelope.event_id())
        .bind(envelope.subject())
        .bind(envelope.action())
        .bind(&payload)
        .bind(&key)
        .bind(ctx.now())
        .fetch_one(&mut **tx)
        .await
        .context("Failed to insert record into outbox")?;

        let sequence: i64 = row.try_get("sequence")?;

        debug!(
            sequence,
            event_id = %envelope.event_id(),
            subject = %envelope.subject(),
            action = %envelope.action(),
            partition_key = ?key,
            "Envelope enqueued in outbox"
        );

        Ok(())
    }

    async fn dequeue_batch(
        &self,
        scope: &PartitionScope,
        max_count: usize,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        let limit = i64::try_from(max_count).unwrap_or(i64::MAX);

        let rows = match scope {
            PartitionScope::All => {
                let sql = format!("{SELECT_PENDING} ORDER BY sequence ASC LIMIT $1");
                sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await
            }
            PartitionScope::Key(key) => {
                let sql = format!(
                    "{SELECT_PENDING} AND partition_key = $2 ORDER BY sequence ASC LIMIT $1"
                );
                sqlx::query(&sql)
                    .bind(limit)
                    .bind(key)
                    .fetch_all(&self.pool)
                    .await
            }
            PartitionScope::Unkeyed => {
                let sql = format!(
                    "{SELECT_PENDING} AND partition_key IS NULL ORDER BY sequence ASC LIMIT $1"
                );
                sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await
            }
            PartitionScope::Shard { index, count } => {
                let sql = format!(
                    "{SELECT_PENDING} AND (CASE WHEN partition_key IS NULL THEN 0 \
                     ELSE mod(abs(hashtext(partition_key)::BIGINT), $3) END) = $2 \
                     ORDER BY sequence ASC LIMIT $1"
                );
                sqlx::query(&sql)
                    .bind(limit)
                    .bind(i64::from(*index))
                    .bind(i64::from((*count).max(1)))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to fetch pending outbox records")?;

        let records = rows
            .into_iter()
            .map(parse_record)
            .collect::<OutboxResult<Vec<_>>>()?;

        debug!(count = records.len(), scope = ?scope, "Fetched pending outbox records");

        Ok(records)
    }

    async fn mark_sent(&self, records: &[OutboxRecord]) -> OutboxResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let sequences: Vec<i64> = records.iter().map(|r| r.sequence).collect();
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET dequeued_at_utc = NOW()
            WHERE sequence = ANY($1)
              AND dequeued_at_utc IS NULL
            "#,
        )
        .bind(&sequences)
        .execute(&self.pool)
        .await
        .context("Failed to mark outbox records as sent")?;

        if result.rows_affected() < sequences.len() as u64 {
            warn!(
                expected = sequences.len(),
                updated = result.rows_affected(),
                "Some outbox records were already marked as sent"
            );
        }

        debug!(
            first_sequence = sequences[0],
            count = sequences.len(),
            "Outbox records marked as sent"
        );

        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<PendingStats> {
        let rec = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                EXTRACT(EPOCH FROM (NOW() - MIN(enqueued_at_utc)))::BIGINT AS age_seconds
            FROM outbox_records
            WHERE dequeued_at_utc IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute pending stats")?;

        let pending: i64 = rec.try_get("pending")?;
        let age: Option<i64> = rec.try_get("age_seconds")?;
        Ok(PendingStats {
            pending,
            oldest_age_seconds: age.unwrap_or(0),
        })
    }

    async fn replay_since(&self, since: DateTime<Utc>) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_records
            SET dequeued_at_utc = NULL
            WHERE enqueued_at_utc >= $1
              AND dequeued_at_utc IS NOT NULL
            "#,
        )
        .bind(since)
        .execute(&self.pool)
        .await
        .context("Failed to replay outbox records since timestamp")?;

        Ok(res.rows_affected())
    }

    async fn purge_sent(&self, older_than: DateTime<Utc>) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            DELETE FROM outbox_records
            WHERE dequeued_at_utc IS NOT NULL
              AND dequeued_at_utc < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .context("Failed to purge sent outbox records")?;

        Ok(res.rows_affected())
    }
}
