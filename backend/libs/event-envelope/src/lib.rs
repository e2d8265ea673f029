//! Event envelope shared by the outbox, the publisher and the subscriber host
//!
//! The envelope is the unit of transport. Its JSON form is the wire format
//! carried by every transport:
//!
//! ```json
//! {
//!   "eventId": "0d6f...",
//!   "subject": "demo.robot.123",
//!   "action": "PowerSourceChange",
//!   "value": { "source": "battery" },
//!   "key": 123,
//!   "correlationId": "c-42",
//!   "source": "urn:demo:robots",
//!   "type": "application/json"
//! }
//! ```
//!
//! `subject` and `action` form the routing key used for subscriber matching.
//! They are fixed at construction and have no setters.
//!
//! Producers outside this workspace may omit `eventId`. Such a body gets a
//! name-based (v5) id derived from its bytes, so every redelivery of the same
//! body decodes to the same event id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod audit;
pub mod classification;
pub mod context;
pub mod entity;
mod error;
pub mod routing;

pub use audit::{AuditRecord, AuditStatus};
pub use classification::{ErrorHandling, ErrorKind, ErrorPolicy};
pub use context::{batch_partition_key, partition_key, ExecutionContext};
pub use entity::{Entity, EntityId};
pub use error::{EnvelopeError, EnvelopeResult};
pub use routing::SubjectPattern;

/// Content type used when the producer does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Namespace for event ids derived from message bodies
const BODY_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6a1c_94e2_3f0b_4d7a_9e51_c0d8_27b4_f613);

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    event_id: Uuid,
    subject: String,
    action: String,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default)]
    source: String,
    #[serde(rename = "type", default = "default_content_type")]
    content_type: String,
    #[serde(default = "Utc::now")]
    time: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope with a fresh event id.
    ///
    /// Fails when `subject` or `action` is blank, since such an envelope could
    /// never be routed.
    pub fn new(
        subject: impl Into<String>,
        action: impl Into<String>,
        value: serde_json::Value,
    ) -> EnvelopeResult<Self> {
        let envelope = Self {
            event_id: Uuid::new_v4(),
            subject: subject.into(),
            action: action.into(),
            value,
            key: None,
            correlation_id: None,
            source: String::new(),
            content_type: default_content_type(),
            time: Utc::now(),
        };
        envelope.check_routing_key()?;
        Ok(envelope)
    }

    /// Serialize `payload` into the envelope value.
    pub fn from_payload<T: Serialize>(
        subject: impl Into<String>,
        action: impl Into<String>,
        payload: &T,
    ) -> EnvelopeResult<Self> {
        Self::new(subject, action, serde_json::to_value(payload)?)
    }

    /// Decode an envelope from its wire representation.
    ///
    /// A body without `eventId` gets an id derived from `bytes`.
    pub fn from_slice(bytes: &[u8]) -> EnvelopeResult<Self> {
        if bytes.is_empty() {
            return Err(EnvelopeError::Malformed("empty message body".to_string()));
        }
        let mut envelope: Envelope = serde_json::from_slice(bytes)?;
        envelope.check_routing_key()?;
        if envelope.event_id.is_nil() {
            envelope.event_id = Uuid::new_v5(&BODY_ID_NAMESPACE, bytes);
        }
        Ok(envelope)
    }

    /// Encode the envelope into its wire representation.
    pub fn to_vec(&self) -> EnvelopeResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn with_key(mut self, key: impl Into<serde_json::Value>) -> Self {
        let key = key.into();
        self.key = if key.is_null() { None } else { Some(key) };
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Routing key used for subscriber matching
    pub fn routing_key(&self) -> (&str, &str) {
        (&self.subject, &self.action)
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn key(&self) -> Option<&serde_json::Value> {
        self.key.as_ref()
    }

    /// The key rendered as a string, the way it is used for partitioning.
    ///
    /// String keys are used verbatim; any other JSON value is rendered with
    /// its JSON text (`123` becomes `"123"`).
    pub fn key_string(&self) -> Option<String> {
        match self.key.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn check_routing_key(&self) -> EnvelopeResult<()> {
        if self.subject.trim().is_empty() {
            return Err(EnvelopeError::MissingField("subject"));
        }
        if self.action.trim().is_empty() {
            return Err(EnvelopeError::MissingField("action"));
        }
        Ok(())
    }
}
