//! Ingress boundary: the raw message and the actions that settle it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::HostResult;

/// A message as handed over by the transport, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Transport-level identity, used when the body cannot be decoded
    pub message_id: String,
    pub body: Vec<u8>,
    /// Content type declared by the transport, if any
    pub content_type: Option<String>,
    /// How many times the transport has delivered this message, starting at 1
    pub delivery_count: u32,
    pub enqueued_time_utc: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(message_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            body,
            content_type: None,
            delivery_count: 1,
            enqueued_time_utc: Utc::now(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_delivery_count(mut self, delivery_count: u32) -> Self {
        self.delivery_count = delivery_count;
        self
    }
}

/// Settlement operations the transport exposes for one message.
///
/// Exactly one of these is called per receive. `abandon` hands the message
/// back for redelivery; transports without an explicit abandon let the lock
/// expire instead.
#[async_trait]
pub trait MessageActions: Send + Sync {
    async fn complete(&self) -> HostResult<()>;

    async fn dead_letter(&self, reason: &str, description: &str) -> HostResult<()>;

    async fn abandon(&self) -> HostResult<()>;
}

/// How a message was settled on the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Completed,
    DeadLettered { reason: String, description: String },
    Abandoned,
}

/// [`MessageActions`] that only remembers what was asked of it; used for
/// in-process delivery and tests.
#[derive(Debug, Default)]
pub struct RecordedActions {
    settlements: Mutex<Vec<Settlement>>,
}

impl RecordedActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().clone()
    }

    pub fn last(&self) -> Option<Settlement> {
        self.settlements.lock().last().cloned()
    }
}

#[async_trait]
impl MessageActions for RecordedActions {
    async fn complete(&self) -> HostResult<()> {
        self.settlements.lock().push(Settlement::Completed);
        Ok(())
    }

    async fn dead_letter(&self, reason: &str, description: &str) -> HostResult<()> {
        self.settlements.lock().push(Settlement::DeadLettered {
            reason: reason.to_string(),
            description: description.to_string(),
        });
        Ok(())
    }

    async fn abandon(&self) -> HostResult<()> {
        self.settlements.lock().push(Settlement::Abandoned);
        Ok(())
    }
}
