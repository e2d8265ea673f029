//! Error types for envelope construction and decoding.

use thiserror::Error;

/// Result type alias for envelope operations.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Body could not be decoded as an envelope
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// A routing field is missing or blank
    #[error("Envelope field `{0}` is required")]
    MissingField(&'static str),

    /// Invalid subject pattern syntax
    #[error("Invalid subject pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
