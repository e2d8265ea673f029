//! Explicit execution context threaded through publish and dispatch calls.
//!
//! Tenant id and clock live here instead of in process-wide state, so the
//! partition key and timestamps for a call are decided by its caller.

use chrono::{DateTime, Utc};

use crate::Envelope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    tenant_id: Option<String>,
    correlation_id: Option<String>,
    now: DateTime<Utc>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Context with no tenant, stamped with the current time
    pub fn new() -> Self {
        Self {
            tenant_id: None,
            correlation_id: None,
            now: Utc::now(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        self.tenant_id = if tenant_id.trim().is_empty() {
            None
        } else {
            Some(tenant_id)
        };
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Pin the clock, mostly useful in tests and replays.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// Partition key for a single envelope.
///
/// First non-empty of: the active tenant id, the envelope's own key. `None`
/// leaves the envelope unkeyed (round-robin on the transport).
pub fn partition_key(ctx: &ExecutionContext, envelope: &Envelope) -> Option<String> {
    ctx.tenant_id()
        .map(str::to_owned)
        .or_else(|| envelope.key_string())
}

/// Partition key for a whole batch: the tenant id, else the key of the first
/// envelope in the batch.
pub fn batch_partition_key(ctx: &ExecutionContext, envelopes: &[Envelope]) -> Option<String> {
    ctx.tenant_id()
        .map(str::to_owned)
        .or_else(|| envelopes.first().and_then(Envelope::key_string))
}
