//! Handler boundary.
//!
//! Handlers report expected failures through [`HandlerError`], tagged with an
//! [`ErrorKind`]; the host resolves the kind through the subscriber's
//! [`ErrorPolicy`](event_envelope::ErrorPolicy). Payload decoding and
//! validation happen here, before the handler runs.

use async_trait::async_trait;
use event_envelope::{Envelope, ErrorKind, ExecutionContext};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

/// Classified handler failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, message)
    }

    pub fn unhandled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unhandled, message)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::unhandled(format!("{:#}", err))
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// Payload taken as raw JSON, with no shape rules
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RawPayload(pub serde_json::Value);

impl Validate for RawPayload {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// Typed subscriber.
///
/// The envelope value is decoded into `Payload` and validated before
/// [`handle`](EventHandler::handle) is called; either failing is a
/// [`ErrorKind::Validation`] failure.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Validate + Send + 'static;

    async fn handle(
        &self,
        ctx: &ExecutionContext,
        envelope: &Envelope,
        payload: Self::Payload,
    ) -> HandlerResult;
}

/// Object-safe form stored in the registry.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn dispatch(&self, ctx: &ExecutionContext, envelope: &Envelope) -> HandlerResult;
}

#[async_trait]
impl<H: EventHandler> ErasedHandler for H {
    async fn dispatch(&self, ctx: &ExecutionContext, envelope: &Envelope) -> HandlerResult {
        let payload = decode_payload::<H::Payload>(envelope)?;
        self.handle(ctx, envelope, payload).await
    }
}

/// Decode and validate the envelope value as `T`.
pub fn decode_payload<T>(envelope: &Envelope) -> Result<T, HandlerError>
where
    T: DeserializeOwned + Validate,
{
    let payload: T = serde_json::from_value(envelope.value().clone())
        .map_err(|e| HandlerError::validation(format!("payload does not match: {}", e)))?;
    payload
        .validate()
        .map_err(|e| HandlerError::validation(e.to_string()))?;
    Ok(payload)
}
