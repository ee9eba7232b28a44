//! Reproducibility: repeated pipeline runs and cross-run consistency
//! metrics.

pub mod harness;
pub mod metrics;

pub use harness::{
    run_repro_job, ReproJob, ReproMetadata, ReproParams, ReproProgress, ReproReport, ReproRun,
};
pub use metrics::{
    compute_metrics, compute_metrics_with, ConsistencyRating, ConsistencyReport, MetricWeights,
    RatingThresholds,
};
