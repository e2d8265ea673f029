//! Error types for change capture.

use resilience::Elapsed;
use thiserror::Error;
use transactional_outbox::OutboxError;

pub type CdcResult<T> = Result<T, CdcError>;

#[derive(Error, Debug)]
pub enum CdcError {
    /// Reading the change source failed; the same window can be read again
    #[error("Change source read failed: {0}")]
    Source(String),

    /// A change row could not be turned into an envelope
    #[error("Failed to convert change at position {position}: {reason}")]
    Conversion { position: i64, reason: String },

    /// The source returned positions that do not strictly increase past the cursor
    #[error("Change position {position} does not follow {previous}")]
    OutOfOrder { previous: i64, position: i64 },

    /// Another poller moved the cursor underneath this one
    #[error("Cursor for {object_name} is no longer at position {expected}")]
    CursorConflict { object_name: String, expected: i64 },

    /// The outbox transaction failed and was rolled back
    #[error("Commit failed: {0}")]
    Commit(#[from] OutboxError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    TimedOut(#[from] Elapsed),

    /// The executor stopped after an earlier unrecoverable error
    #[error("Capture executor is faulted: {0}")]
    Faulted(String),
}

impl CdcError {
    /// Whether retrying the same window later is safe and may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CdcError::Source(_) | CdcError::Commit(_) | CdcError::Database(_) | CdcError::TimedOut(_)
        )
    }
}
