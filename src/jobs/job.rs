//! Analysis job records: the poll-visible state of one pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::pipeline::{
    Agent, Experience, Interview, Need, PipelineParams, PipelineResult, PipelineStage, TOTAL_STAGES,
};

/// Lifecycle state of a job. `Completed` and `Failed` are terminal; a
/// terminal job is never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// Where a run currently is. `stage_number` is 1-based and never
/// decreases; `completed` flips true only when the job reaches a terminal
/// success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage: PipelineStage,
    pub stage_number: u32,
    pub total_stages: u32,
    pub message: String,
    pub completed: bool,
}

impl StageProgress {
    pub fn queued() -> Self {
        Self {
            stage: PipelineStage::GeneratingAgents,
            stage_number: 1,
            total_stages: TOTAL_STAGES,
            message: "Queued".to_string(),
            completed: false,
        }
    }
}

/// Append-only buffers of outputs produced so far. Pollers see these grow
/// while the run is in flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntermediateResults {
    pub agents: Vec<Agent>,
    pub experiences: Vec<Experience>,
    pub interviews: Vec<Interview>,
    pub needs: Vec<Need>,
}

/// The full poll-visible record of one analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub params: PipelineParams,
    pub status: JobStatus,
    pub progress: StageProgress,
    pub partial: IntermediateResults,
    pub result: Option<PipelineResult>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(id: Uuid, params: PipelineParams) -> Self {
        let now = Utc::now();
        Self {
            id,
            params,
            status: JobStatus::Queued,
            progress: StageProgress::queued(),
            partial: IntermediateResults::default(),
            result: None,
            error: None,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
