//! End-to-end pipeline over the in-memory stores: change capture, outbox,
//! publisher, and dispatch to the demo subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use cdc_capture::{
    CaptureConfig, CaptureExecutor, ChangeOperation, DefaultChangeMapper, InMemoryCaptureSink,
    InMemoryChangeSource,
};
use event_envelope::{Envelope, ErrorPolicy, ExecutionContext};
use event_relay_service::handlers::{register_demo_subscribers, Directory};
use parking_lot::Mutex;
use resilience::{RedeliveryPolicy, RetryInvoker};
use serde_json::json;
use subscriber_host::{
    AuditStore, DispatchHost, Disposition, EventHandler, HandlerError, HandlerResult, HostConfig,
    InMemoryAuditStore, InMemoryProcessedEvents, InboundMessage, RawPayload, RecordedActions,
    Settlement, SubscriberRegistry,
};
use transactional_outbox::{
    DequeueConfig, DequeueWorker, EventPublisher, EventTransport, InMemoryOutboxStore,
    PublisherConfig, TransportError,
};

/// Transport that keeps every delivered envelope with its partition key
#[derive(Default)]
struct LoopbackTransport {
    delivered: Mutex<Vec<(Option<String>, Envelope)>>,
}

#[async_trait]
impl EventTransport for LoopbackTransport {
    async fn send(
        &self,
        batch: &[Envelope],
        partition_key: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut delivered = self.delivered.lock();
        for envelope in batch {
            delivered.push((partition_key.map(str::to_owned), envelope.clone()));
        }
        Ok(())
    }
}

fn inbound(envelope: &Envelope) -> InboundMessage {
    InboundMessage::new(envelope.event_id().to_string(), envelope.to_vec().unwrap())
        .with_content_type(envelope.content_type())
}

fn dequeue_worker(
    outbox: &InMemoryOutboxStore,
    transport: Arc<LoopbackTransport>,
) -> DequeueWorker<InMemoryOutboxStore, Arc<LoopbackTransport>> {
    let publisher = EventPublisher::new(
        transport,
        PublisherConfig {
            invoker: RetryInvoker::once(),
            ..Default::default()
        },
    );
    DequeueWorker::new(
        Arc::new(outbox.clone()),
        Arc::new(publisher),
        DequeueConfig::default(),
    )
}

#[tokio::test]
async fn test_captured_changes_reach_subscribers_in_order() {
    let source = InMemoryChangeSource::new();
    source.record(
        "robot",
        ChangeOperation::Insert,
        json!(7),
        Some(json!({"id": 7, "name": "R2"})),
        None,
    );
    source.record(
        "robot",
        ChangeOperation::Update,
        json!(7),
        Some(json!({"id": 7, "name": "R2-D2"})),
        None,
    );
    source.record(
        "robot",
        ChangeOperation::Insert,
        json!(8),
        Some(json!({"id": 8, "name": "C3PO"})),
        None,
    );

    let outbox = InMemoryOutboxStore::new();
    let mut executor = CaptureExecutor::new(
        source.clone(),
        DefaultChangeMapper::new("demo"),
        InMemoryCaptureSink::new(outbox.clone()),
        CaptureConfig::new("robot"),
    );
    let batch = executor.execute_next(100).await.unwrap();
    assert_eq!(batch.records_read, 3);
    assert!(!batch.can_continue);
    assert_eq!(outbox.pending().len(), 3);

    let transport = Arc::new(LoopbackTransport::default());
    let report = dequeue_worker(&outbox, transport.clone())
        .drain_once()
        .await
        .unwrap();
    assert_eq!(report.sent, 3);
    assert!(outbox.pending().is_empty());

    let delivered = transport.delivered.lock().clone();
    let robot_seven: Vec<&str> = delivered
        .iter()
        .filter(|(key, _)| key.as_deref() == Some("7"))
        .map(|(_, e)| e.action())
        .collect();
    assert_eq!(robot_seven, vec!["created", "updated"]);

    let directory = Arc::new(Directory::new());
    let mut registry = SubscriberRegistry::new();
    register_demo_subscribers(&mut registry, directory.clone(), "demo").unwrap();
    let host = DispatchHost::new(
        registry,
        Arc::new(InMemoryAuditStore::new()),
        HostConfig::default(),
    );

    for (_, envelope) in &delivered {
        let actions = RecordedActions::new();
        let disposition = host
            .receive(&ExecutionContext::new(), &inbound(envelope), &actions)
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Completed);
    }

    assert_eq!(directory.robot(7).unwrap().name, "R2-D2");
    assert_eq!(directory.robot(8).unwrap().name, "C3PO");
}

#[tokio::test]
async fn test_redelivered_duplicate_is_not_handled_twice() {
    let directory = Arc::new(Directory::new());
    let mut registry = SubscriberRegistry::new();
    register_demo_subscribers(&mut registry, directory.clone(), "demo").unwrap();
    let host = DispatchHost::new(
        registry,
        Arc::new(InMemoryAuditStore::new()),
        HostConfig::default(),
    )
    .with_processed_events(Arc::new(InMemoryProcessedEvents::new()));

    let envelope = Envelope::new("demo.robot.3", "created", json!({"id": 3, "name": "BB8"}))
        .unwrap()
        .with_key(3);
    let ctx = ExecutionContext::new();

    let first = host
        .receive(&ctx, &inbound(&envelope), &RecordedActions::new())
        .await
        .unwrap();
    let second = host
        .receive(&ctx, &inbound(&envelope), &RecordedActions::new())
        .await
        .unwrap();

    assert_eq!(first, Disposition::Completed);
    assert_eq!(second, Disposition::Duplicate);
    assert_eq!(directory.robot_count(), 1);
}

struct AlwaysFails;

#[async_trait]
impl EventHandler for AlwaysFails {
    type Payload = RawPayload;

    async fn handle(
        &self,
        _ctx: &ExecutionContext,
        _envelope: &Envelope,
        _payload: RawPayload,
    ) -> HandlerResult {
        Err(HandlerError::unhandled("downstream unavailable"))
    }
}

#[tokio::test]
async fn test_aligned_redelivery_lets_host_quarantine_poison_message() {
    let threshold = 3;
    let policy = RedeliveryPolicy::for_poison_threshold(threshold);
    assert!(policy.check_alignment(threshold).is_aligned());

    let mut registry = SubscriberRegistry::new();
    registry
        .register(
            "flaky",
            "demo.robot.>",
            &[],
            ErrorPolicy::default(),
            AlwaysFails,
        )
        .unwrap();
    let audit = Arc::new(InMemoryAuditStore::new());
    let host = DispatchHost::new(
        registry,
        audit.clone(),
        HostConfig {
            poison_threshold: threshold,
            ..Default::default()
        },
    );

    let envelope = Envelope::new("demo.robot.5", "updated", json!({})).unwrap();
    let ctx = ExecutionContext::new();

    // Redeliver the way the transport would until something terminal happens.
    let mut delivery_count = 1;
    let settlement = loop {
        let actions = RecordedActions::new();
        host.receive(
            &ctx,
            &inbound(&envelope).with_delivery_count(delivery_count),
            &actions,
        )
        .await
        .unwrap();

        match actions.last() {
            Some(Settlement::Abandoned) => {
                assert!(policy.allows_redelivery(delivery_count));
                delivery_count += 1;
            }
            other => break other,
        }
    };

    assert_eq!(delivery_count, threshold);
    assert!(matches!(
        settlement,
        Some(Settlement::DeadLettered { ref reason, .. }) if reason == "UnhandledException"
    ));

    let record = audit
        .get(&envelope.event_id().to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(record.skip_processing);
    assert_eq!(record.attempts, threshold as i32);

    // A copy still in flight is dead-lettered without running the handler.
    let actions = RecordedActions::new();
    host.receive(&ctx, &inbound(&envelope), &actions).await.unwrap();
    assert!(matches!(actions.last(), Some(Settlement::DeadLettered { .. })));
    assert_eq!(
        audit
            .get(&envelope.event_id().to_string())
            .await
            .unwrap()
            .unwrap()
            .attempts,
        threshold as i32
    );
}
