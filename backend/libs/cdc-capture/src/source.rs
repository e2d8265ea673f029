//! Change sources: where raw change rows come from.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::cursor::ChangePosition;
use crate::error::{CdcError, CdcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" | "i" => Ok(ChangeOperation::Insert),
            "update" | "u" => Ok(ChangeOperation::Update),
            "delete" | "d" => Ok(ChangeOperation::Delete),
            other => Err(format!("Unknown change operation: {}", other)),
        }
    }
}

/// One row-level change of a watched object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    pub position: ChangePosition,
    pub object_name: String,
    /// Raw operation text as recorded by the source
    pub operation: String,
    /// Primary key of the changed row
    pub key: serde_json::Value,
    /// Row image after the change; `None` for deletes
    pub data: Option<serde_json::Value>,
    pub tenant_id: Option<String>,
    pub changed_at_utc: DateTime<Utc>,
}

/// Read side of change tracking.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Up to `limit` changes of `object_name` with position strictly greater
    /// than `after`, ascending by position.
    async fn read_changes(
        &self,
        object_name: &str,
        after: ChangePosition,
        limit: usize,
    ) -> CdcResult<Vec<ChangeRow>>;
}

/// Reads the `cdc_change_log` table filled by triggers on watched tables.
///
/// Reading strictly past the cursor is gap-free only because the log's insert
/// trigger draws `position` under a per-object advisory lock held until
/// commit: a row that commits later always has a higher position than any
/// row already visible for that object.
#[derive(Clone)]
pub struct SqlxChangeSource {
    pool: PgPool,
}

impl SqlxChangeSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeSource for SqlxChangeSource {
    async fn read_changes(
        &self,
        object_name: &str,
        after: ChangePosition,
        limit: usize,
    ) -> CdcResult<Vec<ChangeRow>> {
        let rows = sqlx::query(
            r#"
            SELECT position, object_name, operation, row_key, row_data, tenant_id, changed_at_utc
            FROM cdc_change_log
            WHERE object_name = $1
              AND position > $2
            ORDER BY position ASC
            LIMIT $3
            "#,
        )
        .bind(object_name)
        .bind(after.value())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CdcError::Source(e.to_string()))?;

        let changes = rows
            .into_iter()
            .map(|row| {
                Ok(ChangeRow {
                    position: ChangePosition(row.try_get("position")?),
                    object_name: row.try_get("object_name")?,
                    operation: row.try_get("operation")?,
                    key: row.try_get("row_key")?,
                    data: row.try_get("row_data")?,
                    tenant_id: row.try_get("tenant_id")?,
                    changed_at_utc: row.try_get("changed_at_utc")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| CdcError::Source(e.to_string()))?;

        debug!(object_name, after = after.value(), count = changes.len(), "Read change rows");

        Ok(changes)
    }
}

/// Change log kept in memory, for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryChangeSource {
    rows: Arc<Mutex<Vec<ChangeRow>>>,
    failures: Arc<Mutex<VecDeque<CdcError>>>,
    next_position: Arc<Mutex<i64>>,
}

impl InMemoryChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change at the next position and return that position.
    pub fn record(
        &self,
        object_name: &str,
        operation: ChangeOperation,
        key: serde_json::Value,
        data: Option<serde_json::Value>,
        tenant_id: Option<&str>,
    ) -> ChangePosition {
        let position = {
            let mut next = self.next_position.lock();
            *next += 1;
            ChangePosition(*next)
        };
        self.push(ChangeRow {
            position,
            object_name: object_name.to_string(),
            operation: operation.as_str().to_string(),
            key,
            data,
            tenant_id: tenant_id.map(str::to_owned),
            changed_at_utc: Utc::now(),
        });
        position
    }

    /// Append a raw row as-is; the caller chooses its position.
    pub fn push(&self, row: ChangeRow) {
        self.rows.lock().push(row);
    }

    /// Make the next read fail with `error`.
    pub fn fail_next(&self, error: CdcError) {
        self.failures.lock().push_back(error);
    }
}

#[async_trait]
impl ChangeSource for InMemoryChangeSource {
    async fn read_changes(
        &self,
        object_name: &str,
        after: ChangePosition,
        limit: usize,
    ) -> CdcResult<Vec<ChangeRow>> {
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|r| r.object_name == object_name && r.position > after)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_parsing() {
        assert_eq!("INSERT".parse::<ChangeOperation>().unwrap(), ChangeOperation::Insert);
        assert_eq!("u".parse::<ChangeOperation>().unwrap(), ChangeOperation::Update);
        assert_eq!("delete".parse::<ChangeOperation>().unwrap(), ChangeOperation::Delete);
        assert!("truncate".parse::<ChangeOperation>().is_err());
    }

    #[tokio::test]
    async fn test_memory_source_reads_after_position() {
        let source = InMemoryChangeSource::new();
        for id in 1..=5 {
            source.record("robots", ChangeOperation::Insert, json!(id), Some(json!({})), None);
        }
        source.record("people", ChangeOperation::Insert, json!(1), Some(json!({})), None);

        let rows = source.read_changes("robots", ChangePosition(2), 2).await.unwrap();
        let positions: Vec<i64> = rows.iter().map(|r| r.position.value()).collect();
        assert_eq!(positions, vec![3, 4]);

        source.fail_next(CdcError::Source("connection reset".into()));
        assert!(source.read_changes("robots", ChangePosition::START, 10).await.is_err());
        assert_eq!(
            source.read_changes("robots", ChangePosition::START, 10).await.unwrap().len(),
            5
        );
    }
}
