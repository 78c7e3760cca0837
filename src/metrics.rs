//! Export outcome counters
//!
//! Exactly two counters, published on the HTTP surface. Success and failure
//! are mutually exclusive per processing attempt; the failure counter carries
//! a coarse `reason` so dashboards can split exec failures from sink
//! failures without scraping logs.

use prometheus::{IntCounterVec, Opts, Registry};

/// Counters for per-pod export pipeline outcomes
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    export_success: IntCounterVec,
    export_failure: IntCounterVec,
}

impl Metrics {
    /// Create the counters and register them on a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let export_success = IntCounterVec::new(
            Opts::new(
                "gpuscout_export_success_total",
                "Total number of successful export executions",
            ),
            &["node", "pod"],
        )?;
        let export_failure = IntCounterVec::new(
            Opts::new(
                "gpuscout_export_failure_total",
                "Total number of failed export executions",
            ),
            &["node", "pod", "reason"],
        )?;

        let registry = Registry::new();
        registry.register(Box::new(export_success.clone()))?;
        registry.register(Box::new(export_failure.clone()))?;

        Ok(Self {
            registry,
            export_success,
            export_failure,
        })
    }

    /// Record a successful pipeline run for a pod
    pub fn success(&self, node: &str, pod: &str) {
        self.export_success.with_label_values(&[node, pod]).inc();
    }

    /// Record a failed pipeline run for a pod
    pub fn failure(&self, node: &str, pod: &str, reason: &str) {
        self.export_failure
            .with_label_values(&[node, pod, reason])
            .inc();
    }

    /// The registry backing the `/metrics` endpoint
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
