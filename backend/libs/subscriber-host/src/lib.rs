//! # Subscriber dispatch host
//!
//! Receives transport messages, routes them to registered handlers by
//! subject and action, and settles each one: complete, leave for
//! redelivery, or dead-letter.
//!
//! ```text
//! transport ─▶ DispatchHost::receive
//!                 │ decode envelope ──────────────▶ dead-letter (DeserializationError)
//!                 │ quarantined? ─────────────────▶ dead-letter
//!                 │ match registry ───────────────▶ complete (no subscriber)
//!                 │ invoke handler ──┬─ ok ───────▶ complete
//!                 │                  └─ failure ──▶ ErrorPolicy ─▶ complete | audit | retry | dead-letter
//!                 ▼
//!            AuditStore (message_audit)
//! ```
//!
//! Failures are counted per event id in the [`AuditStore`]. Once a retried
//! message reaches the poison threshold it is dead-lettered and quarantined
//! (`skip_processing`), so one bad message cannot stall its partition.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use event_envelope::{Envelope, ErrorHandling, ErrorPolicy, ExecutionContext};
//! use serde::Deserialize;
//! use subscriber_host::{
//!     DispatchHost, EventHandler, HandlerError, HandlerResult, HostConfig, InMemoryAuditStore,
//!     SubscriberRegistry,
//! };
//! use validator::Validate;
//!
//! #[derive(Deserialize, Validate)]
//! struct PersonUpdated {
//!     #[validate(length(min = 1))]
//!     name: String,
//! }
//!
//! struct PersonHandler;
//!
//! #[async_trait]
//! impl EventHandler for PersonHandler {
//!     type Payload = PersonUpdated;
//!
//!     async fn handle(
//!         &self,
//!         _ctx: &ExecutionContext,
//!         _envelope: &Envelope,
//!         payload: PersonUpdated,
//!     ) -> HandlerResult {
//!         Err(HandlerError::not_found(format!("no person named {}", payload.name)))
//!     }
//! }
//!
//! # fn build() -> Result<DispatchHost, subscriber_host::HostError> {
//! let mut registry = SubscriberRegistry::new();
//! registry.register(
//!     "people",
//!     "demo.person.*",
//!     &["updated"],
//!     ErrorPolicy::default().with_not_found(ErrorHandling::CompleteWithWarning),
//!     PersonHandler,
//! )?;
//!
//! let host = DispatchHost::new(registry, Arc::new(InMemoryAuditStore::new()), HostConfig::default());
//! # Ok(host)
//! # }
//! ```

pub mod audit;
mod error;
pub mod handler;
pub mod host;
pub mod idempotency;
pub mod message;
pub mod metrics;
pub mod registry;

pub use audit::{AuditStore, InMemoryAuditStore, SqlxAuditStore};
pub use error::{HostError, HostResult};
pub use handler::{decode_payload, EventHandler, HandlerError, HandlerResult, RawPayload};
pub use host::{DispatchHost, Disposition, HostConfig, MAX_DELIVERY_EXCEEDED};
pub use idempotency::{InMemoryProcessedEvents, ProcessedEvents, SqlxProcessedEvents};
pub use message::{InboundMessage, MessageActions, RecordedActions, Settlement};
pub use metrics::DispatchMetrics;
pub use registry::{SubscriberRegistry, Subscription};
