//! Change data capture into the transactional outbox.
//!
//! A [`CaptureExecutor`] reads row changes of one watched object from a
//! [`ChangeSource`], turns each into an [`Envelope`](event_envelope::Envelope)
//! with a [`ChangeMapper`], and hands the batch to a [`CaptureSink`] which
//! enqueues the envelopes and advances the object's cursor in one
//! transaction. Delivery from there on is the outbox worker's job.
//!
//! ```no_run
//! use cdc_capture::{
//!     run_capture, CaptureConfig, CaptureExecutor, DefaultChangeMapper, SqlxCaptureSink,
//!     SqlxChangeSource,
//! };
//! use transactional_outbox::SqlxOutboxStore;
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let mut executor = CaptureExecutor::new(
//!     SqlxChangeSource::new(pool.clone()),
//!     DefaultChangeMapper::new("demo"),
//!     SqlxCaptureSink::new(SqlxOutboxStore::new(pool)),
//!     CaptureConfig::new("robots"),
//! );
//! run_capture(&mut executor, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod cursor;
mod error;
pub mod executor;
pub mod mapper;
pub mod poller;
pub mod sink;
pub mod source;

pub use cursor::{CdcCursor, ChangePosition};
pub use error::{CdcError, CdcResult};
pub use executor::{CaptureConfig, CaptureExecutor, CdcBatchResult, ExecutorState};
pub use mapper::{ChangeMapper, DefaultChangeMapper, MappedChange};
pub use poller::run_capture;
pub use sink::{CaptureSink, InMemoryCaptureSink, SqlxCaptureSink};
pub use source::{ChangeOperation, ChangeRow, ChangeSource, InMemoryChangeSource, SqlxChangeSource};
