use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct OutboxMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub published: IntCounter,
    pub send_failures: IntCounter,
}

impl OutboxMetrics {
    pub fn new(service: &str) -> prometheus::Result<Self> {
        let registry = prometheus::default_registry();

        let pending = IntGauge::with_opts(
            Opts::new(
                "outbox_pending_count",
                "Number of outbox records not yet sent",
            )
            .const_label("service", service.to_string()),
        )?;

        let oldest_pending_age_seconds = IntGauge::with_opts(
            Opts::new(
                "outbox_oldest_pending_age_seconds",
                "Age in seconds of the oldest pending outbox record",
            )
            .const_label("service", service.to_string()),
        )?;

        let published = IntCounter::with_opts(
            Opts::new(
                "outbox_published_total",
                "Total number of envelopes delivered to the transport",
            )
            .const_label("service", service.to_string()),
        )?;

        let send_failures = IntCounter::with_opts(
            Opts::new(
                "outbox_send_failures_total",
                "Transport sends that failed after exhausting retries",
            )
            .const_label("service", service.to_string()),
        )?;

        for metric in [
            Box::new(pending.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(oldest_pending_age_seconds.clone()),
            Box::new(published.clone()),
            Box::new(send_failures.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register outbox metric: {}", e);
            }
        }

        Ok(Self {
            pending,
            oldest_pending_age_seconds,
            published,
            send_failures,
        })
    }

    pub fn observe_stats(&self, stats: crate::PendingStats) {
        self.pending.set(stats.pending);
        self.oldest_pending_age_seconds.set(stats.oldest_age_seconds);
    }
}
