//! Event relay service: captures table changes into the outbox, publishes
//! the outbox to Kafka, and dispatches consumed events to subscribers.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingress;
pub mod logging;
pub mod workers;

pub use config::{Config, RelaySettings};
pub use error::AppError;
