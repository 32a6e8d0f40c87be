//! Prometheus metrics for the execution engine

use outreach_common::types::ActionOutcome;
use outreach_common::{Error, Result};
use outreach_storage::models::TargetStatus;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Engine metrics, registered in their own registry
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    actions: IntCounterVec,
    targets_finished: IntCounterVec,
    starvation: IntCounter,
    action_duration: Histogram,
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let actions = IntCounterVec::new(
            Opts::new("outreach_actions_total", "Platform actions by classified outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let targets_finished = IntCounterVec::new(
            Opts::new(
                "outreach_targets_finished_total",
                "Targets that reached a final status",
            ),
            &["status"],
        )
        .map_err(metrics_error)?;
        let starvation = IntCounter::new(
            "outreach_starvation_total",
            "Claims requeued because no account was eligible",
        )
        .map_err(metrics_error)?;
        let action_duration = Histogram::with_opts(
            HistogramOpts::new(
                "outreach_action_duration_seconds",
                "Latency of platform calls",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(actions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(targets_finished.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(starvation.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(action_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            actions,
            targets_finished,
            starvation,
            action_duration,
        })
    }

    pub fn record_action(&self, outcome: &ActionOutcome, elapsed: Duration) {
        self.actions
            .with_label_values(&[outcome.kind().as_str()])
            .inc();
        self.action_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_finished(&self, status: TargetStatus) {
        self.targets_finished
            .with_label_values(&[status.as_str()])
            .inc();
    }

    pub fn record_starvation(&self) {
        self.starvation.inc();
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", e))
}
