//! Error types for the transactional outbox library.

use event_envelope::{EnvelopeError, ErrorKind};
use resilience::{Elapsed, Retryable};
use thiserror::Error;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Record not found in outbox
    #[error("Outbox record not found: {0}")]
    RecordNotFound(i64),

    /// Transport send failed after the retry budget was spent
    #[error("Publish failed for partition {partition_key:?}: {source}")]
    PublishFailed {
        partition_key: Option<String>,
        #[source]
        source: TransportError,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Stored envelope is no longer a valid envelope
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Generic error with context
    #[error("Outbox error: {0}")]
    Other(#[from] anyhow::Error),
}

impl OutboxError {
    /// Whether the next dequeue cycle may succeed without intervention
    pub fn is_transient(&self) -> bool {
        match self {
            OutboxError::DatabaseError(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            OutboxError::PublishFailed { source, .. } => source.is_retryable(),
            OutboxError::Other(_) => true,
            _ => false,
        }
    }
}

/// Failure reported by an event transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network or broker failure; another attempt may succeed
    #[error("Transient transport failure: {0}")]
    Transient(String),

    /// The broker refused the batch; retrying will not help
    #[error("Transport rejected batch: {0}")]
    Rejected(String),

    #[error(transparent)]
    TimedOut(#[from] Elapsed),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Transient(_) | TransportError::TimedOut(_) => {
                ErrorKind::TransientTransport
            }
            TransportError::Rejected(_) => ErrorKind::Unhandled,
        }
    }
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transport_error_classification() {
        assert!(TransportError::Transient("broker down".into()).is_retryable());
        assert!(TransportError::TimedOut(Elapsed(Duration::from_secs(1))).is_retryable());
        assert!(!TransportError::Rejected("too large".into()).is_retryable());
        assert_eq!(
            TransportError::Transient("x".into()).kind(),
            ErrorKind::TransientTransport
        );
    }

    #[test]
    fn test_publish_failure_transience_follows_transport() {
        let err = OutboxError::PublishFailed {
            partition_key: Some("123".into()),
            source: TransportError::Transient("timeout".into()),
        };
        assert!(err.is_transient());

        let err = OutboxError::PublishFailed {
            partition_key: None,
            source: TransportError::Rejected("bad".into()),
        };
        assert!(!err.is_transient());
        assert!(!OutboxError::RecordNotFound(7).is_transient());
    }
}
