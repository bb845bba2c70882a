#![cfg(feature = "metrics")]

use anyhow::Result;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct MetricsContext {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub broker_operations_total: IntCounterVec,
}

impl MetricsContext {
    pub fn init() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "signalbox_http_requests_total",
                "Number of HTTP responses served, labeled by route and status",
            ),
            &["route", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let broker_operations_total = IntCounterVec::new(
            Opts::new(
                "signalbox_broker_operations_total",
                "Broker operations handled, labeled by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(broker_operations_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            broker_operations_total,
        }))
    }

    pub fn record_broker_operation(&self, operation: &str, outcome: &str) {
        self.broker_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_broker_counters() {
        let metrics = MetricsContext::init().expect("metrics init");
        metrics.record_broker_operation("join", "ok");
        metrics.record_broker_operation("join", "ok");
        metrics.record_broker_operation("add offer", "invalid_request");

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains(
            "signalbox_broker_operations_total{operation=\"join\",outcome=\"ok\"} 2"
        ));
        assert!(text.contains("outcome=\"invalid_request\"} 1"));
    }
}
