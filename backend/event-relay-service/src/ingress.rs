//! Kafka ingress: feeds consumed records to the dispatch host and settles
//! them on Kafka.
//!
//! Kafka has no per-message abandon or dead-letter, so both are emulated:
//!
//! - complete: the offset is committed
//! - dead-letter: the record is produced to the dead-letter topic with
//!   `dlq_reason`/`dlq_description` headers, then the offset is committed
//! - abandon: after the redelivery backoff the record is produced again to
//!   its own topic with `delivery_count` raised by one, then the offset is
//!   committed. The copy lands at the tail of the partition, so records that
//!   arrived meanwhile are handled before it.
//!
//! The delivery budget is enforced by the host (`HostConfig::max_delivery_count`),
//! which dead-letters and quarantines a message on its last delivery instead
//! of abandoning it.
//!
//! Offsets are only committed after the host returned, so a crash mid-dispatch
//! redelivers the record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use event_envelope::ExecutionContext;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use resilience::RedeliveryPolicy;
use subscriber_host::{DispatchHost, HostError, HostResult, InboundMessage, MessageActions};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::AppError;

const DELIVERY_COUNT: &str = "delivery_count";
const DLQ_REASON: &str = "dlq_reason";
const DLQ_DESCRIPTION: &str = "dlq_description";
const DLQ_SOURCE_TOPIC: &str = "dlq_source_topic";

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub brokers: String,
    pub group_id: String,
    pub topics: Vec<String>,
    pub dead_letter_topic: String,
    pub redelivery: RedeliveryPolicy,
    pub produce_timeout: Duration,
}

pub struct KafkaIngress {
    consumer: StreamConsumer,
    producer: FutureProducer,
    host: Arc<DispatchHost>,
    config: IngressConfig,
}

impl KafkaIngress {
    pub fn new(config: IngressConfig, host: Arc<DispatchHost>) -> Result<Self, AppError> {
        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            topics = ?config.topics,
            dead_letter_topic = %config.dead_letter_topic,
            "Initializing Kafka ingress"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics)?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()?;

        Ok(Self {
            consumer,
            producer,
            host,
            config,
        })
    }

    /// Consume until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Kafka ingress loop starting");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.consumer.recv() => {
                    match received {
                        Ok(message) => self.process(&message, &shutdown).await,
                        Err(e) => {
                            error!(error = %e, "Kafka recv error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        info!("Kafka ingress loop stopped");
    }

    async fn process(&self, message: &BorrowedMessage<'_>, shutdown: &watch::Receiver<bool>) {
        let headers = message.headers().map(|h| h.detach());
        let inbound = inbound_message(
            message.topic(),
            message.partition(),
            message.offset(),
            message.payload().unwrap_or_default(),
            headers.as_ref(),
            message.timestamp().to_millis(),
        );
        let ctx = context_from_headers(headers.as_ref());

        let actions = KafkaActions {
            producer: &self.producer,
            config: &self.config,
            topic: message.topic(),
            key: message.key(),
            payload: message.payload().unwrap_or_default(),
            headers: headers.as_ref(),
            message_id: &inbound.message_id,
            delivery_count: inbound.delivery_count,
        };

        // The record is not settled while the host errs, so retrying the
        // whole receive is safe. The offset stays uncommitted throughout.
        let mut attempt = 0u32;
        loop {
            match self.host.receive(&ctx, &inbound, &actions).await {
                Ok(disposition) => {
                    debug!(
                        message_id = %inbound.message_id,
                        disposition = disposition.as_str(),
                        "Kafka record dispatched"
                    );
                    break;
                }
                Err(e) => {
                    attempt += 1;
                    let delay = self.config.redelivery.backoff_for(attempt);
                    warn!(
                        message_id = %inbound.message_id,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        transient = e.is_transient(),
                        error = %e,
                        "Dispatch failed before settlement, retrying"
                    );
                    if *shutdown.borrow() {
                        return;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }

        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            warn!(message_id = %inbound.message_id, error = %e, "Failed to commit Kafka offset");
        }
    }
}

/// Settlement of one consumed record
struct KafkaActions<'a> {
    producer: &'a FutureProducer,
    config: &'a IngressConfig,
    topic: &'a str,
    key: Option<&'a [u8]>,
    payload: &'a [u8],
    headers: Option<&'a OwnedHeaders>,
    message_id: &'a str,
    delivery_count: u32,
}

impl KafkaActions<'_> {
    async fn produce(&self, topic: &str, headers: OwnedHeaders) -> HostResult<()> {
        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(topic).payload(self.payload).headers(headers);
        if let Some(key) = self.key {
            record = record.key(key);
        }

        self.producer
            .send(record, self.config.produce_timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _)| HostError::Settlement {
                message_id: self.message_id.to_string(),
                reason: format!("produce to {topic} failed: {e}"),
            })
    }

    async fn send_to_dead_letter(&self, reason: &str, description: &str) -> HostResult<()> {
        let headers = forward_headers(
            self.headers,
            &[
                (DLQ_REASON, reason.to_string()),
                (DLQ_DESCRIPTION, description.to_string()),
                (DLQ_SOURCE_TOPIC, self.topic.to_string()),
            ],
        );
        self.produce(&self.config.dead_letter_topic, headers).await?;
        warn!(
            message_id = %self.message_id,
            dead_letter_topic = %self.config.dead_letter_topic,
            reason,
            "Record dead-lettered"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageActions for KafkaActions<'_> {
    async fn complete(&self) -> HostResult<()> {
        Ok(())
    }

    async fn dead_letter(&self, reason: &str, description: &str) -> HostResult<()> {
        self.send_to_dead_letter(reason, description).await
    }

    async fn abandon(&self) -> HostResult<()> {
        let delay = self.config.redelivery.backoff_for(self.delivery_count);
        debug!(
            message_id = %self.message_id,
            delivery_count = self.delivery_count,
            delay_ms = delay.as_millis() as u64,
            "Redelivering record"
        );
        // Holds this consumer for the backoff. The republished copy still
        // queues behind records that reached the partition in the meantime.
        tokio::time::sleep(delay).await;

        let next = (self.delivery_count + 1).to_string();
        let headers = forward_headers(self.headers, &[(DELIVERY_COUNT, next)]);
        self.produce(self.topic, headers).await
    }
}

fn header_str<'a, H: Headers>(headers: Option<&'a H>, key: &str) -> Option<&'a str> {
    headers?
        .iter()
        .find(|h| h.key == key)
        .and_then(|h| h.value)
        .and_then(|v| std::str::from_utf8(v).ok())
}

/// Copy `original` with `overrides` replacing headers of the same name
fn forward_headers<H: Headers>(original: Option<&H>, overrides: &[(&str, String)]) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new();
    if let Some(original) = original {
        for header in original.iter() {
            if overrides.iter().any(|(key, _)| *key == header.key) {
                continue;
            }
            headers = headers.insert(Header {
                key: header.key,
                value: header.value,
            });
        }
    }
    for (key, value) in overrides {
        headers = headers.insert(Header {
            key: *key,
            value: Some(value.as_bytes()),
        });
    }
    headers
}

/// Build the host-facing message for a consumed record.
///
/// The message id is the envelope's `event_id` header when present, so audit
/// state for an undecodable body still follows it across redeliveries; it
/// falls back to the record's position.
fn inbound_message<H: Headers>(
    topic: &str,
    partition: i32,
    offset: i64,
    payload: &[u8],
    headers: Option<&H>,
    timestamp_ms: Option<i64>,
) -> InboundMessage {
    let message_id = header_str(headers, "event_id")
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{topic}-{partition}-{offset}"));
    let delivery_count = header_str(headers, DELIVERY_COUNT)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(1)
        .max(1);

    let mut inbound = InboundMessage::new(message_id, payload.to_vec()).with_delivery_count(delivery_count);
    if let Some(content_type) = header_str(headers, "content_type") {
        inbound = inbound.with_content_type(content_type);
    }
    if let Some(enqueued) = timestamp_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
        inbound.enqueued_time_utc = enqueued;
    }
    inbound
}

fn context_from_headers<H: Headers>(headers: Option<&H>) -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    if let Some(tenant_id) = header_str(headers, "tenant_id") {
        ctx = ctx.with_tenant(tenant_id);
    }
    if let Some(correlation_id) = header_str(headers, "correlation_id") {
        ctx = ctx.with_correlation_id(correlation_id);
    }
    ctx
}
