use prometheus::{IntCounterVec, Opts};
use tracing::warn;

use crate::host::Disposition;

/// Dispatch outcome counters
#[derive(Clone)]
pub struct DispatchMetrics {
    pub dispositions: IntCounterVec,
    pub handler_failures: IntCounterVec,
}

impl DispatchMetrics {
    pub fn new(service: &str) -> prometheus::Result<Self> {
        let registry = prometheus::default_registry();

        let dispositions = IntCounterVec::new(
            Opts::new(
                "dispatch_dispositions_total",
                "Received messages by final disposition",
            )
            .const_label("service", service.to_string()),
            &["disposition"],
        )?;

        let handler_failures = IntCounterVec::new(
            Opts::new(
                "dispatch_handler_failures_total",
                "Handler failures by error kind",
            )
            .const_label("service", service.to_string()),
            &["kind"],
        )?;

        for metric in [
            Box::new(dispositions.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(handler_failures.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register dispatch metric: {}", e);
            }
        }

        Ok(Self {
            dispositions,
            handler_failures,
        })
    }

    pub(crate) fn observe(&self, disposition: &Disposition) {
        self.dispositions
            .with_label_values(&[disposition.as_str()])
            .inc();
    }
}
