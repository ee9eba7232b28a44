//! The four-stage elicitation pipeline: persona generation, experience
//! simulation, interviews and latent need extraction.

pub mod runner;
pub mod stages;
pub mod types;

pub use runner::{Pipeline, PipelineEvent};
pub use stages::StageExecutor;
pub use types::{
    aggregate_needs, Agent, AggregatedNeeds, ExecutionMode, Experience, ExperienceStep, Interview,
    Need, NeedCategory, NeedPriority, PipelineParams, PipelineResult, PipelineStage, QaPair,
    RunSummary, TOTAL_STAGES,
};
