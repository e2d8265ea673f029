//! Conversion of change rows into envelopes.

use chrono::{DateTime, Utc};
use event_envelope::{Envelope, ExecutionContext};

use crate::cursor::ChangePosition;
use crate::error::{CdcError, CdcResult};
use crate::source::{ChangeOperation, ChangeRow};

/// Envelope derived from one change row, with what the outbox needs to key it
#[derive(Debug, Clone, PartialEq)]
pub struct MappedChange {
    pub position: ChangePosition,
    pub envelope: Envelope,
    pub tenant_id: Option<String>,
    pub changed_at_utc: DateTime<Utc>,
}

impl MappedChange {
    /// Context the change is enqueued under, carrying the row's tenant
    pub fn context(&self) -> ExecutionContext {
        let ctx = ExecutionContext::new();
        match &self.tenant_id {
            Some(tenant) => ctx.with_tenant(tenant.clone()),
            None => ctx,
        }
    }
}

pub trait ChangeMapper: Send + Sync {
    fn map(&self, row: &ChangeRow) -> CdcResult<MappedChange>;
}

/// Maps `robots` row `123` updated into subject `{prefix}.robots.123`, action
/// `updated`, keyed by the row key.
#[derive(Debug, Clone)]
pub struct DefaultChangeMapper {
    subject_prefix: String,
    source_uri: String,
}

impl DefaultChangeMapper {
    pub fn new(subject_prefix: impl Into<String>) -> Self {
        let subject_prefix = subject_prefix.into();
        let source_uri = format!("urn:cdc:{}", subject_prefix);
        Self {
            subject_prefix,
            source_uri,
        }
    }

    fn action(operation: ChangeOperation) -> &'static str {
        match operation {
            ChangeOperation::Insert => "created",
            ChangeOperation::Update => "updated",
            ChangeOperation::Delete => "deleted",
        }
    }
}

impl ChangeMapper for DefaultChangeMapper {
    fn map(&self, row: &ChangeRow) -> CdcResult<MappedChange> {
        let fail = |reason: String| CdcError::Conversion {
            position: row.position.value(),
            reason,
        };

        let operation: ChangeOperation = row.operation.parse().map_err(fail)?;

        let key = match &row.key {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => return Err(fail(format!("unsupported row key {}", other))),
        };
        if key.is_empty() || key.contains('.') {
            return Err(fail(format!("row key {:?} is not a valid subject segment", key)));
        }

        let value = match (operation, &row.data) {
            (ChangeOperation::Delete, _) => serde_json::Value::Null,
            (_, Some(data)) => data.clone(),
            (_, None) => return Err(fail(format!("{} without a row image", operation))),
        };

        let subject = format!("{}.{}.{}", self.subject_prefix, row.object_name, key);
        let envelope = Envelope::new(subject, Self::action(operation), value)
            .map_err(|e| fail(e.to_string()))?
            .with_key(row.key.clone())
            .with_source(format!("{}:{}", self.source_uri, row.object_name))
            .with_time(row.changed_at_utc);

        Ok(MappedChange {
            position: row.position,
            envelope,
            tenant_id: row.tenant_id.clone(),
            changed_at_utc: row.changed_at_utc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(position: i64, operation: &str, key: serde_json::Value) -> ChangeRow {
        ChangeRow {
            position: ChangePosition(position),
            object_name: "robots".to_string(),
            operation: operation.to_string(),
            key,
            data: Some(json!({"power": "battery"})),
            tenant_id: None,
            changed_at_utc: Utc::now(),
        }
    }

    #[test]
    fn test_maps_update_to_envelope() {
        let mapper = DefaultChangeMapper::new("demo");
        let mapped = mapper.map(&row(7, "update", json!(123))).unwrap();

        assert_eq!(mapped.position, ChangePosition(7));
        assert_eq!(mapped.envelope.subject(), "demo.robots.123");
        assert_eq!(mapped.envelope.action(), "updated");
        assert_eq!(mapped.envelope.key_string().as_deref(), Some("123"));
        assert_eq!(mapped.envelope.value()["power"], "battery");
        assert_eq!(mapped.envelope.source(), "urn:cdc:demo:robots");
    }

    #[test]
    fn test_delete_carries_no_value() {
        let mapper = DefaultChangeMapper::new("demo");
        let mut change = row(8, "delete", json!("abc"));
        change.data = None;
        let mapped = mapper.map(&change).unwrap();
        assert_eq!(mapped.envelope.action(), "deleted");
        assert!(mapped.envelope.value().is_null());
    }

    #[test]
    fn test_conversion_failures_carry_position() {
        let mapper = DefaultChangeMapper::new("demo");

        for bad in [
            row(9, "truncate", json!(1)),
            row(9, "insert", json!(null)),
            row(9, "insert", json!("a.b")),
        ] {
            match mapper.map(&bad) {
                Err(CdcError::Conversion { position, .. }) => assert_eq!(position, 9),
                other => panic!("expected conversion error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_context_uses_row_tenant() {
        let mapper = DefaultChangeMapper::new("demo");
        let mut change = row(1, "insert", json!(5));
        change.tenant_id = Some("tenant-a".to_string());
        let mapped = mapper.map(&change).unwrap();

        let ctx = mapped.context();
        assert_eq!(ctx.tenant_id(), Some("tenant-a"));
        assert_eq!(mapped.envelope.time(), change.changed_at_utc);
    }
}
