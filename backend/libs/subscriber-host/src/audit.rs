//! Poison/audit store.
//!
//! One [`AuditRecord`] per event id. Writes merge with what is stored:
//! `attempts` only grows, the originating status and reason are kept from
//! the first write, and a quarantined record stays quarantined until an
//! operator releases it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_envelope::{AuditRecord, AuditStatus};
use parking_lot::Mutex;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::error::{HostError, HostResult};

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn get(&self, event_id: &str) -> HostResult<Option<AuditRecord>>;

    /// Insert or merge `record` into the stored one.
    async fn upsert(&self, record: &AuditRecord) -> HostResult<()>;

    /// Drop the record once its message finally succeeded.
    async fn delete(&self, event_id: &str) -> HostResult<bool>;

    /// Records with `skip_processing` set, oldest skip first.
    async fn list_quarantined(&self, limit: usize) -> HostResult<Vec<AuditRecord>>;

    /// Clear `skip_processing` so a redelivered message is handled again.
    ///
    /// `attempts` is kept, so a released message that fails once more is
    /// dead-lettered straight away.
    async fn release(&self, event_id: &str) -> HostResult<bool>;
}

/// Audit store over the `message_audit` table.
#[derive(Clone)]
pub struct SqlxAuditStore {
    pool: PgPool,
}

impl SqlxAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(row: &PgRow, column: &str) -> HostResult<AuditStatus> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: String| HostError::Other(anyhow::anyhow!(e)))
}

fn parse_record(row: PgRow) -> HostResult<AuditRecord> {
    Ok(AuditRecord {
        event_id: row.try_get("event_id")?,
        attempts: row.try_get("attempts")?,
        enqueued_time_utc: row.try_get("enqueued_time_utc")?,
        poisoned_time_utc: row.try_get("poisoned_time_utc")?,
        skipped_time_utc: row.try_get("skipped_time_utc")?,
        status: parse_status(&row, "status")?,
        reason: row.try_get("reason")?,
        originating_status: parse_status(&row, "originating_status")?,
        originating_reason: row.try_get("originating_reason")?,
        body: row.try_get("body")?,
        exception: row.try_get("exception")?,
        skip_processing: row.try_get("skip_processing")?,
    })
}

const SELECT_AUDIT: &str = r#"
    SELECT event_id, attempts, enqueued_time_utc, poisoned_time_utc, skipped_time_utc,
           status, reason, originating_status, originating_reason, body, exception,
           skip_processing
    FROM message_audit
"#;

#[async_trait]
impl AuditStore for SqlxAuditStore {
    async fn get(&self, event_id: &str) -> HostResult<Option<AuditRecord>> {
        let row = sqlx::query(&format!("{SELECT_AUDIT} WHERE event_id = $1"))
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load audit record")?;

        row.map(parse_record).transpose()
    }

    async fn upsert(&self, record: &AuditRecord) -> HostResult<()> {
        sqlx::query(
            r#"
            INSERT INTO message_audit (
                event_id, attempts, enqueued_time_utc, poisoned_time_utc, skipped_time_utc,
                status, reason, originating_status, originating_reason, body, exception,
                skip_processing
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (event_id) DO UPDATE SET
                attempts = GREATEST(message_audit.attempts, EXCLUDED.attempts),
                poisoned_time_utc = COALESCE(message_audit.poisoned_time_utc, EXCLUDED.poisoned_time_utc),
                skipped_time_utc = COALESCE(message_audit.skipped_time_utc, EXCLUDED.skipped_time_utc),
                status = EXCLUDED.status,
                reason = EXCLUDED.reason,
                exception = COALESCE(EXCLUDED.exception, message_audit.exception),
                skip_processing = message_audit.skip_processing OR EXCLUDED.skip_processing
            "#,
        )
        .bind(&record.event_id)
        .bind(record.attempts)
        .bind(record.enqueued_time_utc)
        .bind(record.poisoned_time_utc)
        .bind(record.skipped_time_utc)
        .bind(record.status.as_str())
        .bind(&record.reason)
        .bind(record.originating_status.as_str())
        .bind(&record.originating_reason)
        .bind(&record.body)
        .bind(&record.exception)
        .bind(record.skip_processing)
        .execute(&self.pool)
        .await
        .context("Failed to upsert audit record")?;

        debug!(
            event_id = %record.event_id,
            attempts = record.attempts,
            status = %record.status,
            skip_processing = record.skip_processing,
            "Audit record written"
        );
        Ok(())
    }

    async fn delete(&self, event_id: &str) -> HostResult<bool> {
        let res = sqlx::query("DELETE FROM message_audit WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete audit record")?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_quarantined(&self, limit: usize) -> HostResult<Vec<AuditRecord>> {
        let rows = sqlx::query(&format!(
            "{SELECT_AUDIT} WHERE skip_processing ORDER BY skipped_time_utc ASC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list quarantined audit records")?;

        rows.into_iter().map(parse_record).collect()
    }

    async fn release(&self, event_id: &str) -> HostResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE message_audit
            SET skip_processing = FALSE,
                skipped_time_utc = NULL,
                status = 'retrying',
                reason = 'released'
            WHERE event_id = $1 AND skip_processing
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await
        .context("Failed to release audit record")?;

        let released = res.rows_affected() > 0;
        if released {
            info!(event_id, "Quarantined message released");
        }
        Ok(released)
    }
}

/// Audit store kept in memory, for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryAuditStore {
    records: Arc<Mutex<HashMap<String, AuditRecord>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn get(&self, event_id: &str) -> HostResult<Option<AuditRecord>> {
        Ok(self.records.lock().get(event_id).cloned())
    }

    async fn upsert(&self, record: &AuditRecord) -> HostResult<()> {
        let mut records = self.records.lock();
        match records.get_mut(&record.event_id) {
            Some(stored) => stored.merge_from(record),
            None => {
                records.insert(record.event_id.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, event_id: &str) -> HostResult<bool> {
        Ok(self.records.lock().remove(event_id).is_some())
    }

    async fn list_quarantined(&self, limit: usize) -> HostResult<Vec<AuditRecord>> {
        let mut quarantined: Vec<AuditRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| r.skip_processing)
            .cloned()
            .collect();
        quarantined.sort_by_key(|r| r.skipped_time_utc.unwrap_or(DateTime::<Utc>::MIN_UTC));
        quarantined.truncate(limit);
        Ok(quarantined)
    }

    async fn release(&self, event_id: &str) -> HostResult<bool> {
        let mut records = self.records.lock();
        match records.get_mut(event_id) {
            Some(record) if record.skip_processing => {
                record.skip_processing = false;
                record.skipped_time_utc = None;
                record.status = AuditStatus::Retrying;
                record.reason = "released".to_string();
                info!(event_id, "Quarantined message released");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
