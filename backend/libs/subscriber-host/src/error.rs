//! Error types for the dispatch host

use event_envelope::EnvelopeError;
use thiserror::Error;

/// Result type for host and store operations
pub type HostResult<T> = Result<T, HostError>;

/// Infrastructure failures while dispatching.
///
/// Handler failures are not `HostError`s: they are classified and resolved
/// inside the pipeline. A `HostError` means the message could not be settled,
/// so the transport keeps it for redelivery.
#[derive(Error, Debug)]
pub enum HostError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Event ID validation failed (empty, too long)
    #[error("Invalid event ID: {0}")]
    InvalidEventId(String),

    /// Invalid subscriber registration
    #[error("Invalid registration: {0}")]
    Registration(#[from] EnvelopeError),

    /// The transport refused to complete, abandon or dead-letter the message
    #[error("Failed to settle message {message_id}: {reason}")]
    Settlement { message_id: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl HostError {
    /// Check if error is transient (should retry)
    pub fn is_transient(&self) -> bool {
        match self {
            HostError::Database(sqlx_err) => matches!(
                sqlx_err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            HostError::Settlement { .. } => true,
            _ => false,
        }
    }
}
