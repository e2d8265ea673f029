use std::sync::Arc;
use std::time::Duration;

use event_relay_service::config::Config;
use event_relay_service::handlers::{register_demo_subscribers, Directory};
use event_relay_service::ingress::{IngressConfig, KafkaIngress};
use event_relay_service::{db, logging, workers, AppError};
use subscriber_host::{
    DispatchHost, DispatchMetrics, SqlxAuditStore, SqlxProcessedEvents, SubscriberRegistry,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use transactional_outbox::{
    EventPublisher, KafkaTransport, OutboxMetrics, PublisherConfig, SqlxOutboxStore,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();

    let config = Config::from_env()?;
    let relay = config.relay.clone();
    info!(config = ?config, "Starting event relay service");

    let pool = db::init_pool(&config.database_url, relay.db_max_connections).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    // Egress: capture -> outbox -> Kafka
    let store = Arc::new(SqlxOutboxStore::new(pool.clone()));
    let outbox_metrics = OutboxMetrics::new(&relay.service_name)?;
    let transport = KafkaTransport::connect(&relay.kafka_brokers, relay.topic_prefix.clone())
        .map_err(|e| AppError::StartServer(format!("Failed to create Kafka producer: {e}")))?;
    let publisher = Arc::new(
        EventPublisher::new(transport, PublisherConfig::default())
            .with_metrics(outbox_metrics.clone()),
    );

    if relay.enable_cdc {
        handles.extend(workers::spawn_capture_pollers(&pool, &relay, &shutdown_rx));
    }
    handles.extend(workers::spawn_dequeue_workers(
        store.clone(),
        publisher,
        &relay,
        Some(outbox_metrics),
        &shutdown_rx,
    ));

    let processed = SqlxProcessedEvents::new(pool.clone(), relay.processed_retention());
    handles.push(workers::spawn_retention_cleanup(
        processed.clone(),
        store,
        relay.processed_retention(),
        shutdown_rx.clone(),
    ));

    // Ingress: Kafka -> dispatch host -> subscribers
    if relay.enable_ingress {
        let redelivery = relay.redelivery_policy();
        let alignment = redelivery.check_alignment(relay.poison_threshold);
        if !alignment.is_aligned() {
            warn!(
                alignment = ?alignment,
                poison_threshold = relay.poison_threshold,
                "Redelivery policy and poison threshold are misaligned; failing messages are dead-lettered on the delivery budget before the poison threshold"
            );
        }

        let mut registry = SubscriberRegistry::new();
        register_demo_subscribers(&mut registry, Arc::new(Directory::new()), &relay.subject_prefix)
            .map_err(|e| AppError::StartServer(format!("Invalid subscriber registration: {e}")))?;

        let host = DispatchHost::new(
            registry,
            Arc::new(SqlxAuditStore::new(pool.clone())),
            relay.host_config(),
        )
        .with_processed_events(Arc::new(processed))
        .with_metrics(DispatchMetrics::new(&relay.service_name)?);

        let ingress = KafkaIngress::new(
            IngressConfig {
                brokers: relay.kafka_brokers.clone(),
                group_id: relay.consumer_group.clone(),
                topics: relay.subscribe_topics.clone(),
                dead_letter_topic: relay.dead_letter_topic.clone(),
                redelivery,
                produce_timeout: Duration::from_secs(30),
            },
            Arc::new(host),
        )?;
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { ingress.run(shutdown).await }));
    }

    info!(tasks = handles.len(), "Event relay service running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown requested, stopping workers");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task panicked");
        }
    }

    pool.close().await;
    info!("Event relay service stopped");
    Ok(())
}
