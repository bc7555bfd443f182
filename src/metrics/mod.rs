//! Per-run Prometheus metrics.
//!
//! # Example
//!
//! ```ignore
//! use knowledge_forge::metrics::{PipelineMetrics, OUTCOME_SUCCESS};
//!
//! let metrics = PipelineMetrics::new()?;
//! metrics.record_stage(StageId::Plan, OUTCOME_SUCCESS, elapsed);
//! std::fs::write("metrics.prom", metrics.render()?)?;
//! ```

pub mod prometheus;

pub use self::prometheus::{
    PipelineMetrics, OUTCOME_ERROR, OUTCOME_FAILED, OUTCOME_PAUSED, OUTCOME_SKIPPED,
    OUTCOME_SUCCESS,
};
