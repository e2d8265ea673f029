//! Kafka implementation of the egress transport.

use std::time::Duration;

use async_trait::async_trait;
use event_envelope::Envelope;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::debug;

use crate::error::TransportError;
use crate::publisher::EventTransport;

/// Kafka-based event transport.
///
/// This transport:
/// - Maps the first subject segment to a topic (`demo.robot.1` -> `{prefix}.demo.events`)
/// - Uses the partition key as the Kafka message key; unkeyed batches are
///   spread by the producer's partitioner
/// - Sends a batch sequentially so the broker sees slice order
/// - Carries envelope identity in headers
pub struct KafkaTransport {
    producer: FutureProducer,
    topic_prefix: String,
    delivery_timeout: Duration,
}

impl KafkaTransport {
    /// Create a new Kafka transport.
    ///
    /// # Kafka Configuration Requirements
    ///
    /// The producer MUST be configured with:
    /// - `enable.idempotence = true` (prevents duplicates on internal retries)
    /// - `acks = all` (ensures durability)
    /// - `max.in.flight.requests.per.connection = 5` (ordering with idempotence)
    pub fn new(producer: FutureProducer, topic_prefix: impl Into<String>) -> Self {
        Self {
            producer,
            topic_prefix: topic_prefix.into(),
            delivery_timeout: Duration::from_secs(30),
        }
    }

    /// Build an idempotent producer for `brokers`.
    pub fn connect(
        brokers: &str,
        topic_prefix: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .create()
            .map_err(|e| TransportError::Rejected(format!("Invalid producer config: {e}")))?;
        Ok(Self::new(producer, topic_prefix))
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Map a subject to its Kafka topic.
    ///
    /// - "demo.robot.123" -> "{prefix}.demo.events"
    /// - "billing.invoice.9" -> "{prefix}.billing.events"
    pub fn topic_for(&self, subject: &str) -> String {
        let domain = subject.split('.').next().unwrap_or("unknown");
        format!("{}.{}.events", self.topic_prefix, domain.to_ascii_lowercase())
    }
}

/// Broker refusals that no amount of retrying fixes
fn classify(err: KafkaError) -> TransportError {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::TopicAuthorizationFailed,
        ) => TransportError::Rejected(err.to_string()),
        _ => TransportError::Transient(err.to_string()),
    }
}

#[async_trait]
impl EventTransport for KafkaTransport {
    async fn send(
        &self,
        batch: &[Envelope],
        partition_key: Option<&str>,
    ) -> Result<(), TransportError> {
        for envelope in batch {
            let topic = self.topic_for(envelope.subject());
            let payload = serde_json::to_vec(envelope)
                .map_err(|e| TransportError::Rejected(format!("Unserializable envelope: {e}")))?;

            let event_id = envelope.event_id().to_string();
            let mut headers = OwnedHeaders::new()
                .insert(Header {
                    key: "event_id",
                    value: Some(event_id.as_bytes()),
                })
                .insert(Header {
                    key: "subject",
                    value: Some(envelope.subject().as_bytes()),
                })
                .insert(Header {
                    key: "action",
                    value: Some(envelope.action().as_bytes()),
                })
                .insert(Header {
                    key: "content_type",
                    value: Some(envelope.content_type().as_bytes()),
                });

            if let Some(correlation_id) = envelope.correlation_id() {
                headers = headers.insert(Header {
                    key: "correlation_id",
                    value: Some(correlation_id.as_bytes()),
                });
            }

            let mut record: FutureRecord<'_, str, [u8]> =
                FutureRecord::to(&topic)
                    .payload(payload.as_slice())
                    .headers(headers);
            if let Some(key) = partition_key {
                record = record.key(key);
            }

            let (partition, offset) = self
                .producer
                .send(record, self.delivery_timeout)
                .await
                .map_err(|(err, _)| classify(err))?;

            debug!(
                event_id = %event_id,
                topic = %topic,
                partition,
                offset,
                "Envelope delivered to Kafka"
            );
        }

        Ok(())
    }
}
