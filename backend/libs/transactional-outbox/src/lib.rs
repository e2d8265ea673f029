//! # Transactional Outbox
//!
//! Durable, ordered hand-off between a business write and the event
//! transport.
//!
//! The pattern ensures that:
//! 1. A business change and the envelope describing it commit in the same
//!    database transaction (rolling back leaves no outbox row behind)
//! 2. A dequeue worker reads committed records in `sequence` order
//! 3. The publisher groups records by partition key and sends each group with
//!    bounded retry
//! 4. Records are marked sent only after their group was delivered
//!
//! This gives **at-least-once delivery** with **per-partition ordering**.
//! Consumers must tolerate duplicates; the envelope's `eventId` is the
//! idempotency key.
//!
//! ## Usage Example
//!
//! ### 1. Enqueue an envelope with the business write
//!
//! ```rust,no_run
//! use event_envelope::{Envelope, ExecutionContext};
//! use transactional_outbox::{OutboxStore, SqlxOutboxStore};
//! use serde_json::json;
//!
//! async fn change_power_source(
//!     store: &SqlxOutboxStore,
//!     robot_id: i64,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = ExecutionContext::new();
//!     let mut tx = store.begin().await?;
//!
//!     sqlx::query("UPDATE robots SET power_source = 'battery' WHERE id = $1")
//!         .bind(robot_id)
//!         .execute(&mut *tx)
//!         .await?;
//!
//!     let envelope = Envelope::new(
//!         format!("demo.robot.{robot_id}"),
//!         "PowerSourceChange",
//!         json!({ "source": "battery" }),
//!     )?
//!     .with_key(robot_id);
//!     store.enqueue(&mut tx, &ctx, &envelope).await?;
//!
//!     // Both rows or neither
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### 2. Start the dequeue worker
//!
//! ```rust,no_run
//! use transactional_outbox::{
//!     DequeueConfig, DequeueWorker, EventPublisher, KafkaTransport, PublisherConfig,
//!     SqlxOutboxStore,
//! };
//! use sqlx::PgPool;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = PgPool::connect("postgresql://localhost/relay").await?;
//!     let store = Arc::new(SqlxOutboxStore::new(pool));
//!
//!     let transport = KafkaTransport::connect("localhost:9092", "relay")?;
//!     let publisher = Arc::new(EventPublisher::new(transport, PublisherConfig::default()));
//!
//!     let worker = DequeueWorker::new(store, publisher, DequeueConfig::default());
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     worker.run(shutdown_rx).await?;
//!
//!     Ok(())
//! }
//! ```

mod error;
pub mod kafka;
pub mod macros;
pub mod memory;
pub mod metrics;
pub mod postgres;
pub mod publisher;
pub mod record;
pub mod store;
pub mod worker;

pub use error::{OutboxError, OutboxResult, TransportError};
pub use event_envelope::{Envelope, ExecutionContext};
pub use kafka::KafkaTransport;
pub use memory::{InMemoryOutboxStore, MemoryTx};
pub use metrics::OutboxMetrics;
pub use postgres::SqlxOutboxStore;
pub use publisher::{EventPublisher, EventTransport, Grouping, PublisherConfig};
pub use record::{group_by_partition, OutboxRecord, PartitionScope, PendingStats};
pub use store::OutboxStore;
pub use worker::{DequeueConfig, DequeueWorker, DrainReport};
