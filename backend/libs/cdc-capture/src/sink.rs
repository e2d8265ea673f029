//! Atomic hand-off of mapped changes to the outbox.
//!
//! A sink writes every envelope of a batch and the advanced cursor in one
//! transaction. The cursor update is conditional on the cursor still being
//! where the executor read it, so two pollers on the same object cannot both
//! commit the same window.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::Row;
use tracing::{debug, warn};
use transactional_outbox::{InMemoryOutboxStore, OutboxStore, SqlxOutboxStore};

use crate::cursor::{CdcCursor, ChangePosition};
use crate::error::{CdcError, CdcResult};
use crate::mapper::MappedChange;

#[async_trait]
pub trait CaptureSink: Send + Sync {
    async fn load_cursor(&self, object_name: &str) -> CdcResult<CdcCursor>;

    /// Enqueue `changes` and move the cursor from `expected` to `next`, all or
    /// nothing. Fails with [`CdcError::CursorConflict`] when the stored cursor
    /// is no longer at `expected`.
    async fn commit_batch(
        &self,
        expected: &CdcCursor,
        next: &CdcCursor,
        changes: &[MappedChange],
    ) -> CdcResult<()>;
}

/// Sink over the `outbox_records` and `cdc_cursors` tables.
#[derive(Clone)]
pub struct SqlxCaptureSink {
    outbox: SqlxOutboxStore,
}

impl SqlxCaptureSink {
    pub fn new(outbox: SqlxOutboxStore) -> Self {
        Self { outbox }
    }

    /// Move a cursor back (or forward) so capture resumes after `position`.
    /// Operator use only; run it while the object's poller is stopped.
    pub async fn rewind_cursor(&self, object_name: &str, position: ChangePosition) -> CdcResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cdc_cursors (object_name, last_position, updated_at_utc)
            VALUES ($1, $2, NOW())
            ON CONFLICT (object_name)
            DO UPDATE SET last_position = EXCLUDED.last_position,
                          updated_at_utc = EXCLUDED.updated_at_utc
            "#,
        )
        .bind(object_name)
        .bind(position.value())
        .execute(self.outbox.pool())
        .await?;

        warn!(object_name, position = position.value(), "CDC cursor rewound");
        Ok(())
    }
}

#[async_trait]
impl CaptureSink for SqlxCaptureSink {
    async fn load_cursor(&self, object_name: &str) -> CdcResult<CdcCursor> {
        let row = sqlx::query(
            r#"
            SELECT object_name, last_position, updated_at_utc
            FROM cdc_cursors
            WHERE object_name = $1
            "#,
        )
        .bind(object_name)
        .fetch_optional(self.outbox.pool())
        .await?;

        match row {
            Some(row) => Ok(CdcCursor {
                object_name: row.try_get("object_name")?,
                last_position: ChangePosition(row.try_get("last_position")?),
                updated_at_utc: row.try_get("updated_at_utc")?,
            }),
            None => Ok(CdcCursor::initial(object_name)),
        }
    }

    async fn commit_batch(
        &self,
        expected: &CdcCursor,
        next: &CdcCursor,
        changes: &[MappedChange],
    ) -> CdcResult<()> {
        let mut tx = self.outbox.begin().await?;

        for change in changes {
            self.outbox
                .enqueue(&mut tx, &change.context(), &change.envelope)
                .await?;
        }

        // Compare-and-set on the previous position. An object's first commit
        // may find no row yet, so that case upserts instead.
        let query = if expected.last_position == ChangePosition::START {
            r#"
            INSERT INTO cdc_cursors (object_name, last_position, updated_at_utc)
            VALUES ($1, $2, $3)
            ON CONFLICT (object_name)
            DO UPDATE SET last_position = EXCLUDED.last_position,
                          updated_at_utc = EXCLUDED.updated_at_utc
            WHERE cdc_cursors.last_position = $4
            "#
        } else {
            r#"
            UPDATE cdc_cursors
            SET last_position = $2, updated_at_utc = $3
            WHERE object_name = $1 AND last_position = $4
            "#
        };
        let affected = sqlx::query(query)
            .bind(&next.object_name)
            .bind(next.last_position.value())
            .bind(next.updated_at_utc)
            .bind(expected.last_position.value())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if affected == 0 {
            // Dropping the transaction rolls back the enqueued records.
            return Err(CdcError::CursorConflict {
                object_name: expected.object_name.clone(),
                expected: expected.last_position.value(),
            });
        }

        tx.commit().await?;

        debug!(
            object_name = %next.object_name,
            from = expected.last_position.value(),
            to = next.last_position.value(),
            count = changes.len(),
            "Committed change batch to outbox"
        );
        Ok(())
    }
}

/// Sink over an [`InMemoryOutboxStore`], with cursors kept beside it.
#[derive(Clone, Default)]
pub struct InMemoryCaptureSink {
    outbox: InMemoryOutboxStore,
    cursors: Arc<Mutex<HashMap<String, CdcCursor>>>,
}

impl InMemoryCaptureSink {
    pub fn new(outbox: InMemoryOutboxStore) -> Self {
        Self {
            outbox,
            cursors: Arc::default(),
        }
    }

    pub fn outbox(&self) -> &InMemoryOutboxStore {
        &self.outbox
    }

    pub fn rewind_cursor(&self, object_name: &str, position: ChangePosition) {
        let cursor = CdcCursor::initial(object_name).advanced_to(position, Utc::now());
        self.cursors.lock().insert(object_name.to_string(), cursor);
    }
}

#[async_trait]
impl CaptureSink for InMemoryCaptureSink {
    async fn load_cursor(&self, object_name: &str) -> CdcResult<CdcCursor> {
        Ok(self
            .cursors
            .lock()
            .get(object_name)
            .cloned()
            .unwrap_or_else(|| CdcCursor::initial(object_name)))
    }

    async fn commit_batch(
        &self,
        expected: &CdcCursor,
        next: &CdcCursor,
        changes: &[MappedChange],
    ) -> CdcResult<()> {
        let current = self.load_cursor(&expected.object_name).await?;
        if current.last_position != expected.last_position {
            return Err(CdcError::CursorConflict {
                object_name: expected.object_name.clone(),
                expected: expected.last_position.value(),
            });
        }

        let mut tx = self.outbox.begin();
        for change in changes {
            self.outbox
                .enqueue(&mut tx, &change.context(), &change.envelope)
                .await?;
        }

        let cursors = self.cursors.clone();
        let next = next.clone();
        tx.on_commit(move || {
            cursors.lock().insert(next.object_name.clone(), next);
        });
        tx.commit();
        Ok(())
    }
}
