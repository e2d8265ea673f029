//! Failure taxonomy and the per-subscriber policy that resolves it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a failure observed anywhere in the delivery pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Message body could not be decoded into an envelope
    Deserialization,
    /// Payload failed the subscriber's declared shape rules
    Validation,
    /// Entity referenced by the event does not exist
    NotFound,
    /// Authorization failure
    Security,
    /// Network/broker failure while sending
    TransientTransport,
    /// Anything else, including handler panics
    Unhandled,
}

impl ErrorKind {
    /// Machine-readable name, used as dead-letter reason and audit status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Deserialization => "DeserializationError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Security => "SecurityError",
            ErrorKind::TransientTransport => "TransientTransportError",
            ErrorKind::Unhandled => "UnhandledException",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the subscriber host does with a message after a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorHandling {
    /// Acknowledge, nothing else
    Complete,
    /// Acknowledge and log a warning
    CompleteWithWarning,
    /// Acknowledge and log an error
    CompleteWithError,
    /// Acknowledge and persist an audit record for an operator
    ContinueWithAudit,
    /// Leave for transport redelivery; counts toward the poison threshold
    Retry,
    /// Move to the dead-letter destination
    DeadLetter,
}

/// Per-subscriber mapping from failure category to handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPolicy {
    pub not_found: ErrorHandling,
    pub invalid_data: ErrorHandling,
    pub security: ErrorHandling,
    pub unhandled: ErrorHandling,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            not_found: ErrorHandling::CompleteWithWarning,
            invalid_data: ErrorHandling::CompleteWithError,
            security: ErrorHandling::Retry,
            unhandled: ErrorHandling::Retry,
        }
    }
}

impl ErrorPolicy {
    pub fn with_not_found(mut self, handling: ErrorHandling) -> Self {
        self.not_found = handling;
        self
    }

    pub fn with_invalid_data(mut self, handling: ErrorHandling) -> Self {
        self.invalid_data = handling;
        self
    }

    pub fn with_security(mut self, handling: ErrorHandling) -> Self {
        self.security = handling;
        self
    }

    pub fn with_unhandled(mut self, handling: ErrorHandling) -> Self {
        self.unhandled = handling;
        self
    }

    /// Resolve a failure category to its handling.
    ///
    /// Deserialization failures always dead-letter: redelivery cannot repair
    /// malformed input. Transport failures are always retried.
    pub fn resolve(&self, kind: ErrorKind) -> ErrorHandling {
        match kind {
            ErrorKind::Deserialization => ErrorHandling::DeadLetter,
            ErrorKind::Validation => self.invalid_data,
            ErrorKind::NotFound => self.not_found,
            ErrorKind::Security => self.security,
            ErrorKind::TransientTransport => ErrorHandling::Retry,
            ErrorKind::Unhandled => self.unhandled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ErrorPolicy::default();
        assert_eq!(
            policy.resolve(ErrorKind::NotFound),
            ErrorHandling::CompleteWithWarning
        );
        assert_eq!(
            policy.resolve(ErrorKind::Validation),
            ErrorHandling::CompleteWithError
        );
        assert_eq!(policy.resolve(ErrorKind::Security), ErrorHandling::Retry);
        assert_eq!(policy.resolve(ErrorKind::Unhandled), ErrorHandling::Retry);
    }

    #[test]
    fn test_deserialization_always_dead_letters() {
        let policy = ErrorPolicy::default()
            .with_invalid_data(ErrorHandling::Complete)
            .with_unhandled(ErrorHandling::Complete);
        assert_eq!(
            policy.resolve(ErrorKind::Deserialization),
            ErrorHandling::DeadLetter
        );
        assert_eq!(
            policy.resolve(ErrorKind::TransientTransport),
            ErrorHandling::Retry
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Deserialization.to_string(), "DeserializationError");
        assert_eq!(ErrorKind::Unhandled.as_str(), "UnhandledException");
    }
}
