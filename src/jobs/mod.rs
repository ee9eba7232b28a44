//! Asynchronous analysis jobs: records, the shared arena and the
//! controller that drives a pipeline run to a terminal state.

pub mod controller;
pub mod job;
pub mod store;

pub use controller::run_analysis_job;
pub use job::{AnalysisJob, IntermediateResults, JobStatus, StageProgress};
pub use store::JobArena;
