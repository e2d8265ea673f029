//! Processed-event tracking, so redelivered duplicates skip the handler.
//!
//! Delivery is at-least-once. A consumer whose side effects must not repeat
//! gives the host a [`ProcessedEvents`] store: an event id already marked
//! processed is completed without invoking the handler again, and a
//! successful handler run marks it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::error::{HostError, HostResult};

#[async_trait]
pub trait ProcessedEvents: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> HostResult<bool>;

    /// Returns `false` when the id was already marked (a concurrent duplicate).
    async fn mark_processed(
        &self,
        event_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> HostResult<bool>;

    /// Forget ids processed before `cutoff`.
    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> HostResult<u64>;
}

/// Reject ids that cannot be stored in `processed_events.event_id`.
pub(crate) fn validate_event_id(event_id: &str) -> HostResult<()> {
    if event_id.is_empty() {
        return Err(HostError::InvalidEventId(
            "Event ID cannot be empty".to_string(),
        ));
    }

    if event_id.len() > 255 {
        return Err(HostError::InvalidEventId(format!(
            "Event ID too long: {} characters (max 255)",
            event_id.len()
        )));
    }

    Ok(())
}

/// Processed-event store over the `processed_events` table.
///
/// Marking uses `INSERT ... ON CONFLICT DO NOTHING`, so concurrent consumers
/// racing on one id see exactly one winner.
#[derive(Clone)]
pub struct SqlxProcessedEvents {
    pool: PgPool,
    retention: Duration,
}

impl SqlxProcessedEvents {
    /// `retention` bounds how long ids are remembered; see
    /// [`cleanup_old_events`](Self::cleanup_old_events).
    pub fn new(pool: PgPool, retention: Duration) -> Self {
        Self { pool, retention }
    }

    /// Delete ids older than the retention window. Run periodically.
    pub async fn cleanup_old_events(&self) -> HostResult<u64> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| HostError::Other(anyhow::anyhow!("Invalid retention duration: {}", e)))?;
        self.cleanup_before(Utc::now() - retention).await
    }
}

#[async_trait]
impl ProcessedEvents for SqlxProcessedEvents {
    async fn is_processed(&self, event_id: &str) -> HostResult<bool> {
        validate_event_id(event_id)?;

        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events WHERE event_id = $1
            ) AS exists
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check if event is processed")?;

        let exists: bool = row.try_get("exists")?;
        if exists {
            debug!(event_id = %event_id, "Event already processed");
        }
        Ok(exists)
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> HostResult<bool> {
        validate_event_id(event_id)?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, metadata, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .context("Failed to mark event as processed")?;

        let was_inserted = result.rows_affected() > 0;
        if !was_inserted {
            debug!(event_id = %event_id, "Event already marked as processed (duplicate)");
        }
        Ok(was_inserted)
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> HostResult<u64> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to cleanup old events")?;

        let deleted_count = result.rows_affected();
        if deleted_count > 0 {
            info!(deleted_count, cutoff_time = %cutoff, "Cleaned up old processed events");
        }
        Ok(deleted_count)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProcessedEvents {
    processed: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl InMemoryProcessedEvents {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedEvents for InMemoryProcessedEvents {
    async fn is_processed(&self, event_id: &str) -> HostResult<bool> {
        validate_event_id(event_id)?;
        Ok(self.processed.lock().contains_key(event_id))
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        _metadata: Option<serde_json::Value>,
    ) -> HostResult<bool> {
        validate_event_id(event_id)?;
        let mut processed = self.processed.lock();
        if processed.contains_key(event_id) {
            return Ok(false);
        }
        processed.insert(event_id.to_string(), Utc::now());
        Ok(true)
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> HostResult<u64> {
        let mut processed = self.processed.lock();
        let before = processed.len();
        processed.retain(|_, at| *at >= cutoff);
        Ok((before - processed.len()) as u64)
    }
}
