//! Prometheus metrics for one pipeline run.
//!
//! Every run owns its registry, so two controllers in the same process (or
//! two tests) never share counters. The controller renders the registry in
//! the text exposition format and stores it as `metrics.prom` in the session.

use std::time::Duration;

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

use crate::pipeline::checkpoint::StageId;
use crate::pipeline::stages::BatchSummary;

/// Stage outcome label values.
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_SKIPPED: &str = "skipped";
pub const OUTCOME_PAUSED: &str = "paused";
pub const OUTCOME_FAILED: &str = "failed";
pub const OUTCOME_ERROR: &str = "error";

/// Counters and histograms recorded by the controller during one run.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    /// Stage invocations, labeled by stage and outcome.
    stage_outcomes: CounterVec,
    /// Wall-clock time per stage invocation, labeled by stage.
    stage_duration: HistogramVec,
    /// Items processed by worker-pool batches, labeled by batch and status.
    batch_items: CounterVec,
    /// Extra attempts spent on retried items, labeled by batch.
    batch_retries: CounterVec,
}

impl PipelineMetrics {
    /// Creates the metrics and registers them with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if a metric definition is invalid.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let stage_outcomes = CounterVec::new(
            Opts::new(
                "knowledge_forge_stage_runs_total",
                "Stage invocations by outcome",
            ),
            &["stage", "outcome"],
        )?;

        let stage_duration = HistogramVec::new(
            HistogramOpts::new(
                "knowledge_forge_stage_duration_seconds",
                "Stage execution duration in seconds",
            )
            .buckets(vec![0.1, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
            &["stage"],
        )?;

        let batch_items = CounterVec::new(
            Opts::new(
                "knowledge_forge_batch_items_total",
                "Items processed by worker-pool batches",
            ),
            &["batch", "status"],
        )?;

        let batch_retries = CounterVec::new(
            Opts::new(
                "knowledge_forge_batch_retries_total",
                "Retry attempts spent inside worker-pool batches",
            ),
            &["batch"],
        )?;

        registry.register(Box::new(stage_outcomes.clone()))?;
        registry.register(Box::new(stage_duration.clone()))?;
        registry.register(Box::new(batch_items.clone()))?;
        registry.register(Box::new(batch_retries.clone()))?;

        Ok(Self {
            registry,
            stage_outcomes,
            stage_duration,
            batch_items,
            batch_retries,
        })
    }

    /// Records one stage invocation and how long it took.
    pub fn record_stage(&self, stage: StageId, outcome: &str, elapsed: Duration) {
        self.stage_outcomes
            .with_label_values(&[stage.name(), outcome])
            .inc();
        self.stage_duration
            .with_label_values(&[stage.name()])
            .observe(elapsed.as_secs_f64());
    }

    /// Records the item counts of the batches a stage ran.
    pub fn record_batches(&self, batches: &[BatchSummary]) {
        for batch in batches {
            self.batch_items
                .with_label_values(&[batch.label.as_str(), "succeeded"])
                .inc_by(batch.succeeded as f64);
            self.batch_items
                .with_label_values(&[batch.label.as_str(), "failed"])
                .inc_by(batch.failed as f64);
            self.batch_retries
                .with_label_values(&[batch.label.as_str()])
                .inc_by(batch.retries as f64);
        }
    }

    /// Number of recorded invocations of `stage` with `outcome`.
    pub fn stage_count(&self, stage: StageId, outcome: &str) -> u64 {
        self.stage_outcomes
            .with_label_values(&[stage.name(), outcome])
            .get() as u64
    }

    /// Renders every metric in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if encoding fails.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
