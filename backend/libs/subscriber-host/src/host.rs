//! Dispatch pipeline: decode, match, invoke, resolve.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use event_envelope::{
    AuditRecord, AuditStatus, Envelope, ErrorHandling, ErrorKind, ExecutionContext,
};
use futures::FutureExt;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::audit::AuditStore;
use crate::error::HostResult;
use crate::handler::HandlerError;
use crate::idempotency::ProcessedEvents;
use crate::message::{InboundMessage, MessageActions};
use crate::metrics::DispatchMetrics;
use crate::registry::SubscriberRegistry;

/// Dead-letter reason when the transport's delivery budget runs out
pub const MAX_DELIVERY_EXCEEDED: &str = "MaxDeliveryCountExceeded";

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Failed attempts after which a retried message is dead-lettered and
    /// quarantined instead
    pub poison_threshold: u32,
    /// Deliveries the transport makes before giving up on a message. A retry
    /// on the last of them is dead-lettered with [`MAX_DELIVERY_EXCEEDED`].
    pub max_delivery_count: Option<u32>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            poison_threshold: 5,
            max_delivery_count: None,
        }
    }
}

/// How one receive ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handler succeeded
    Completed,
    /// Handler failed and its policy acknowledged the message anyway
    CompletedAfterFailure {
        kind: ErrorKind,
        handling: ErrorHandling,
    },
    /// No subscriber for the routing key
    Unmatched,
    /// Already processed on an earlier delivery
    Duplicate,
    /// Left for transport redelivery
    Retried { attempts: i32 },
    DeadLettered { reason: String },
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Completed => "completed",
            Disposition::CompletedAfterFailure { handling, .. } => match handling {
                ErrorHandling::CompleteWithWarning => "completed_with_warning",
                ErrorHandling::CompleteWithError => "completed_with_error",
                ErrorHandling::ContinueWithAudit => "completed_with_audit",
                _ => "completed_after_failure",
            },
            Disposition::Unmatched => "unmatched",
            Disposition::Duplicate => "duplicate",
            Disposition::Retried { .. } => "retried",
            Disposition::DeadLettered { .. } => "dead_lettered",
        }
    }

    /// Whether the transport is done with the message
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Disposition::Retried { .. })
    }
}

/// Subscriber dispatch host.
///
/// Each [`receive`](Self::receive) settles the message exactly once through
/// its [`MessageActions`]:
///
/// 1. Undecodable bodies are dead-lettered at once.
/// 2. Messages quarantined earlier are dead-lettered without a handler run.
/// 3. Messages no subscriber wants are completed without an audit record.
/// 4. The handler runs inside a boundary that turns panics into
///    [`ErrorKind::Unhandled`] failures; a failure is resolved through the
///    subscriber's error policy.
/// 5. A failure resolved to retry on or past the poison threshold, or on the
///    transport's last allowed delivery, is dead-lettered and quarantined
///    instead.
///
/// Audit state is written before the message is settled, so a crash in
/// between never loses an attempt.
pub struct DispatchHost {
    registry: SubscriberRegistry,
    audit: Arc<dyn AuditStore>,
    processed: Option<Arc<dyn ProcessedEvents>>,
    config: HostConfig,
    metrics: Option<DispatchMetrics>,
}

impl DispatchHost {
    pub fn new(registry: SubscriberRegistry, audit: Arc<dyn AuditStore>, config: HostConfig) -> Self {
        Self {
            registry,
            audit,
            processed: None,
            config,
            metrics: None,
        }
    }

    /// Skip handlers for event ids already processed on an earlier delivery.
    pub fn with_processed_events(mut self, processed: Arc<dyn ProcessedEvents>) -> Self {
        self.processed = Some(processed);
        self
    }

    pub fn with_metrics(mut self, metrics: DispatchMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub async fn receive(
        &self,
        ctx: &ExecutionContext,
        message: &InboundMessage,
        actions: &dyn MessageActions,
    ) -> HostResult<Disposition> {
        let disposition = self.dispatch(ctx, message, actions).await?;
        if let Some(metrics) = &self.metrics {
            metrics.observe(&disposition);
        }
        Ok(disposition)
    }

    async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        message: &InboundMessage,
        actions: &dyn MessageActions,
    ) -> HostResult<Disposition> {
        let envelope = match decode(message) {
            Ok(envelope) => envelope,
            Err(reason) => return self.reject_undecodable(ctx, message, actions, &reason).await,
        };

        let event_id = envelope.event_id().to_string();
        let ctx = match (ctx.correlation_id(), envelope.correlation_id()) {
            (None, Some(correlation_id)) => ctx.clone().with_correlation_id(correlation_id),
            _ => ctx.clone(),
        };

        let existing = self.audit.get(&event_id).await?;
        if let Some(record) = existing.as_ref().filter(|r| r.skip_processing) {
            info!(
                event_id = %event_id,
                attempts = record.attempts,
                reason = %record.reason,
                "Quarantined message redelivered, dead-lettering without handler"
            );
            actions
                .dead_letter(&record.reason, "message was quarantined on an earlier delivery")
                .await?;
            return Ok(Disposition::DeadLettered {
                reason: record.reason.clone(),
            });
        }

        let Some(subscription) = self.registry.find(envelope.subject(), envelope.action()) else {
            debug!(
                event_id = %event_id,
                subject = %envelope.subject(),
                action = %envelope.action(),
                "No subscriber matched, completing"
            );
            actions.complete().await?;
            return Ok(Disposition::Unmatched);
        };

        if let Some(processed) = &self.processed {
            if processed.is_processed(&event_id).await? {
                actions.complete().await?;
                return Ok(Disposition::Duplicate);
            }
        }

        let outcome = AssertUnwindSafe(subscription.handler.dispatch(&ctx, &envelope))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::unhandled(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        let failure = match outcome {
            Ok(()) => {
                if let Some(processed) = &self.processed {
                    let metadata = json!({
                        "subscriber": subscription.name(),
                        "subject": envelope.subject(),
                        "action": envelope.action(),
                    });
                    processed.mark_processed(&event_id, Some(metadata)).await?;
                }
                if existing.is_some() {
                    self.audit.delete(&event_id).await?;
                }
                actions.complete().await?;
                debug!(event_id = %event_id, subscriber = subscription.name(), "Message handled");
                return Ok(Disposition::Completed);
            }
            Err(failure) => failure,
        };

        if let Some(metrics) = &self.metrics {
            metrics
                .handler_failures
                .with_label_values(&[failure.kind.as_str()])
                .inc();
        }

        let attempts = existing.as_ref().map_or(1, |r| r.attempts.saturating_add(1));
        let mut handling = subscription.policy().resolve(failure.kind);
        let escalated = handling == ErrorHandling::Retry
            && attempts >= i32::try_from(self.config.poison_threshold).unwrap_or(i32::MAX);
        let budget_spent = handling == ErrorHandling::Retry
            && !escalated
            && self
                .config
                .max_delivery_count
                .is_some_and(|max| message.delivery_count >= max);
        if escalated || budget_spent {
            handling = ErrorHandling::DeadLetter;
        }

        let failure_record = |status: AuditStatus| match &existing {
            Some(record) => {
                let mut record = record.clone();
                record.record_attempt(status, failure.kind, Some(failure.message.clone()), ctx.now());
                record
            }
            None => AuditRecord::first_failure(
                event_id.clone(),
                message.body.clone(),
                message.enqueued_time_utc,
                status,
                failure.kind,
                Some(failure.message.clone()),
                ctx.now(),
            ),
        };

        match handling {
            ErrorHandling::Complete
            | ErrorHandling::CompleteWithWarning
            | ErrorHandling::CompleteWithError => {
                match handling {
                    ErrorHandling::CompleteWithWarning => warn!(
                        event_id = %event_id,
                        subscriber = subscription.name(),
                        kind = %failure.kind,
                        error = %failure.message,
                        "Handler failed, completing with warning"
                    ),
                    ErrorHandling::CompleteWithError => error!(
                        event_id = %event_id,
                        subscriber = subscription.name(),
                        kind = %failure.kind,
                        error = %failure.message,
                        "Handler failed, completing with error"
                    ),
                    _ => debug!(
                        event_id = %event_id,
                        kind = %failure.kind,
                        "Handler failed, completing"
                    ),
                }
                if existing.is_some() {
                    self.audit.delete(&event_id).await?;
                }
                actions.complete().await?;
                Ok(Disposition::CompletedAfterFailure {
                    kind: failure.kind,
                    handling,
                })
            }
            ErrorHandling::ContinueWithAudit => {
                self.audit.upsert(&failure_record(AuditStatus::Audited)).await?;
                info!(
                    event_id = %event_id,
                    subscriber = subscription.name(),
                    kind = %failure.kind,
                    "Handler failed, completing with audit record"
                );
                actions.complete().await?;
                Ok(Disposition::CompletedAfterFailure {
                    kind: failure.kind,
                    handling,
                })
            }
            ErrorHandling::Retry => {
                self.audit.upsert(&failure_record(AuditStatus::Retrying)).await?;
                warn!(
                    event_id = %event_id,
                    subscriber = subscription.name(),
                    kind = %failure.kind,
                    attempts,
                    poison_threshold = self.config.poison_threshold,
                    error = %failure.message,
                    "Handler failed, leaving message for redelivery"
                );
                actions.abandon().await?;
                Ok(Disposition::Retried { attempts })
            }
            ErrorHandling::DeadLetter => {
                let reason = if budget_spent {
                    MAX_DELIVERY_EXCEEDED
                } else {
                    failure.kind.as_str()
                };
                let mut record = failure_record(AuditStatus::DeadLettered);
                record.mark_skipped(AuditStatus::DeadLettered, reason, ctx.now());
                self.audit.upsert(&record).await?;

                let description = if escalated {
                    format!(
                        "poison threshold {} reached after {} attempts: {}",
                        self.config.poison_threshold, attempts, failure.message
                    )
                } else if budget_spent {
                    format!(
                        "delivered {} times without success: {}",
                        message.delivery_count, failure.message
                    )
                } else {
                    failure.message.clone()
                };
                error!(
                    event_id = %event_id,
                    subscriber = subscription.name(),
                    kind = %failure.kind,
                    attempts,
                    escalated,
                    budget_spent,
                    error = %failure.message,
                    "Dead-lettering message"
                );
                actions.dead_letter(reason, &description).await?;
                Ok(Disposition::DeadLettered {
                    reason: reason.to_string(),
                })
            }
        }
    }

    /// Dead-letter a body that is not an envelope, keyed by transport id.
    async fn reject_undecodable(
        &self,
        ctx: &ExecutionContext,
        message: &InboundMessage,
        actions: &dyn MessageActions,
        reason: &str,
    ) -> HostResult<Disposition> {
        let kind = ErrorKind::Deserialization;
        let mut record = match self.audit.get(&message.message_id).await? {
            Some(mut record) => {
                record.record_attempt(AuditStatus::DeadLettered, kind, Some(reason.to_string()), ctx.now());
                record
            }
            None => AuditRecord::first_failure(
                message.message_id.clone(),
                message.body.clone(),
                message.enqueued_time_utc,
                AuditStatus::DeadLettered,
                kind,
                Some(reason.to_string()),
                ctx.now(),
            ),
        };
        record.mark_skipped(AuditStatus::DeadLettered, kind.as_str(), ctx.now());
        self.audit.upsert(&record).await?;

        error!(
            message_id = %message.message_id,
            error = %reason,
            "Undecodable message, dead-lettering"
        );
        actions.dead_letter(kind.as_str(), reason).await?;
        Ok(Disposition::DeadLettered {
            reason: kind.as_str().to_string(),
        })
    }
}

fn decode(message: &InboundMessage) -> Result<Envelope, String> {
    if let Some(content_type) = &message.content_type {
        if !is_json(content_type) {
            return Err(format!("unsupported content type `{}`", content_type));
        }
    }
    Envelope::from_slice(&message.body).map_err(|e| e.to_string())
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
