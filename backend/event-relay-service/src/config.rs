use std::fmt;
use std::time::Duration;

use resilience::RedeliveryPolicy;
use serde::Deserialize;
use subscriber_host::HostConfig;
use transactional_outbox::PartitionScope;

use crate::error::AppError;

/// Service configuration.
///
/// `DATABASE_URL` is required; everything else is read from `RELAY_*`
/// variables and falls back to a default.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub relay: RelaySettings,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("relay", &self.relay)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    // Kafka
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_subscribe_topics")]
    pub subscribe_topics: Vec<String>,
    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter_topic: String,

    // Change capture
    #[serde(default = "default_true")]
    pub enable_cdc: bool,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_cdc_objects")]
    pub cdc_objects: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub cdc_batch_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub cdc_poll_interval_ms: u64,

    // Outbox
    #[serde(default = "default_batch_size")]
    pub outbox_batch_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub outbox_poll_interval_ms: u64,
    /// Number of dequeue workers; each owns one hash shard of partition keys
    #[serde(default = "default_outbox_workers")]
    pub outbox_workers: u32,

    // Dispatch
    #[serde(default = "default_true")]
    pub enable_ingress: bool,
    #[serde(default = "default_poison_threshold")]
    pub poison_threshold: u32,
    /// Transport delivery budget; unset means `poison_threshold + 1`
    pub max_deliveries: Option<u32>,
    #[serde(default = "default_redelivery_min_backoff_ms")]
    pub redelivery_min_backoff_ms: u64,
    #[serde(default = "default_redelivery_max_backoff_ms")]
    pub redelivery_max_backoff_ms: u64,
    pub message_ttl_secs: Option<u64>,
    #[serde(default = "default_processed_retention_days")]
    pub processed_retention_days: u64,
}

fn default_service_name() -> String {
    "event-relay-service".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_topic_prefix() -> String {
    "relay".to_string()
}

fn default_consumer_group() -> String {
    "event-relay".to_string()
}

fn default_subscribe_topics() -> Vec<String> {
    vec!["relay.demo.events".to_string()]
}

fn default_dead_letter_topic() -> String {
    "relay.dead-letter".to_string()
}

fn default_true() -> bool {
    true
}

fn default_subject_prefix() -> String {
    "demo".to_string()
}

fn default_cdc_objects() -> Vec<String> {
    vec!["robot".to_string(), "person".to_string()]
}

fn default_batch_size() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_outbox_workers() -> u32 {
    1
}

fn default_poison_threshold() -> u32 {
    5
}

fn default_redelivery_min_backoff_ms() -> u64 {
    1000
}

fn default_redelivery_max_backoff_ms() -> u64 {
    60_000
}

fn default_processed_retention_days() -> u64 {
    7
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL must be set".to_string()))?;
        let relay = envy::prefixed("RELAY_")
            .from_env::<RelaySettings>()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config = Self {
            database_url,
            relay,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        let relay = &self.relay;
        if relay.poison_threshold == 0 {
            return Err(AppError::Config(
                "RELAY_POISON_THRESHOLD must be at least 1".to_string(),
            ));
        }
        if relay.outbox_workers == 0 {
            return Err(AppError::Config(
                "RELAY_OUTBOX_WORKERS must be at least 1".to_string(),
            ));
        }
        if relay.cdc_batch_size == 0 || relay.outbox_batch_size == 0 {
            return Err(AppError::Config("batch sizes must be positive".to_string()));
        }
        if relay.enable_ingress && relay.subscribe_topics.is_empty() {
            return Err(AppError::Config(
                "RELAY_SUBSCRIBE_TOPICS is empty while ingress is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl RelaySettings {
    /// Host settings sharing the transport's delivery budget, so the host
    /// finalizes the audit record of a message on its last delivery.
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            poison_threshold: self.poison_threshold,
            max_delivery_count: self.redelivery_policy().max_deliveries,
        }
    }

    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        let base = match self.max_deliveries {
            Some(max) => RedeliveryPolicy {
                max_deliveries: Some(max),
                ..Default::default()
            },
            None => RedeliveryPolicy::for_poison_threshold(self.poison_threshold),
        };

        RedeliveryPolicy {
            min_backoff: Duration::from_millis(self.redelivery_min_backoff_ms),
            max_backoff: Duration::from_millis(self.redelivery_max_backoff_ms),
            message_ttl: self.message_ttl_secs.map(Duration::from_secs),
            ..base
        }
    }

    /// Disjoint partition scopes, one per dequeue worker
    pub fn outbox_scopes(&self) -> Vec<PartitionScope> {
        if self.outbox_workers <= 1 {
            return vec![PartitionScope::All];
        }
        (0..self.outbox_workers)
            .map(|index| PartitionScope::Shard {
                index,
                count: self.outbox_workers,
            })
            .collect()
    }

    pub fn processed_retention(&self) -> Duration {
        Duration::from_secs(self.processed_retention_days * 24 * 60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(vars: &[(&str, &str)]) -> RelaySettings {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>();
        envy::prefixed("RELAY_").from_iter(vars).unwrap()
    }

    #[test]
    fn test_defaults_apply_to_empty_environment() {
        let relay = settings(&[]);
        assert_eq!(relay.poison_threshold, 5);
        assert_eq!(relay.cdc_objects, vec!["robot", "person"]);
        assert_eq!(relay.subscribe_topics, vec!["relay.demo.events"]);
        assert!(relay.enable_cdc);
        assert_eq!(relay.outbox_scopes(), vec![PartitionScope::All]);
    }

    #[test]
    fn test_lists_and_overrides_are_parsed() {
        let relay = settings(&[
            ("RELAY_CDC_OBJECTS", "robot,person,invoice"),
            ("RELAY_POISON_THRESHOLD", "3"),
            ("RELAY_OUTBOX_WORKERS", "2"),
        ]);
        assert_eq!(relay.cdc_objects.len(), 3);
        assert_eq!(relay.host_config().poison_threshold, 3);
        assert_eq!(
            relay.outbox_scopes(),
            vec![
                PartitionScope::Shard { index: 0, count: 2 },
                PartitionScope::Shard { index: 1, count: 2 },
            ]
        );
    }

    #[test]
    fn test_default_redelivery_policy_is_aligned() {
        let relay = settings(&[("RELAY_POISON_THRESHOLD", "4")]);
        let policy = relay.redelivery_policy();
        assert_eq!(policy.max_deliveries, Some(5));
        assert_eq!(policy.min_backoff, Duration::from_secs(1));
        assert!(policy.check_alignment(relay.poison_threshold).is_aligned());
    }

    #[test]
    fn test_short_delivery_budget_is_reported() {
        let relay = settings(&[
            ("RELAY_POISON_THRESHOLD", "5"),
            ("RELAY_MAX_DELIVERIES", "2"),
        ]);
        assert!(!relay
            .redelivery_policy()
            .check_alignment(relay.poison_threshold)
            .is_aligned());
        assert_eq!(relay.host_config().max_delivery_count, Some(2));
    }

    #[test]
    fn test_debug_redacts_database_url() {
        let config = Config {
            database_url: "postgres://relay:secret@db/relay".to_string(),
            relay: settings(&[]),
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }
}
