//! Transport-free service facade.
//!
//! `ElicitService` owns the job arenas and exposes the six logical
//! operations: submit/status/results for analyses and for reproducibility
//! batches. Each submission spawns an independent background task; callers
//! poll with the returned job id. An unknown id is a typed error, never an
//! empty success.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{PipelineConfig, ReproConfig, DEFAULT_AGENTS};
use crate::error::ServiceError;
use crate::jobs::{
    run_analysis_job, AnalysisJob, IntermediateResults, JobArena, JobStatus, StageProgress,
};
use crate::llm::TextGenerator;
use crate::pipeline::{ExecutionMode, Pipeline, PipelineParams, PipelineResult};
use crate::repro::{run_repro_job, ReproJob, ReproParams, ReproProgress, ReproReport};

/// Request to start one analysis job.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub product: String,
    pub design_context: String,
    /// Defaults to [`DEFAULT_AGENTS`] when absent.
    pub n_agents: Option<usize>,
    pub mode: ExecutionMode,
}

/// Request to start one reproducibility batch.
#[derive(Debug, Clone)]
pub struct ReproRequest {
    pub product: String,
    pub design_context: String,
    pub n_agents: Option<usize>,
    pub n_iterations: usize,
    pub mode: ExecutionMode,
}

/// Poll snapshot of an analysis job.
///
/// Carries both the per-buffer counts and the buffers themselves, so a
/// poller can render incremental output without a second call.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisStatus {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: StageProgress,
    pub agents_generated: usize,
    pub experiences_completed: usize,
    pub interviews_completed: usize,
    pub needs_extracted: usize,
    /// Everything produced so far, growing as stages advance.
    pub partial: IntermediateResults,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

/// Result snapshot of an analysis job. Before completion `completed` is
/// false and `partial` carries everything produced so far.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResults {
    pub id: Uuid,
    pub status: JobStatus,
    pub completed: bool,
    pub result: Option<PipelineResult>,
    pub partial: IntermediateResults,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

/// Poll snapshot of a reproducibility job.
#[derive(Debug, Clone, Serialize)]
pub struct ReproStatus {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: ReproProgress,
    pub completed_iterations: usize,
    pub error: Option<String>,
}

/// The service facade owning job state and the pipeline.
pub struct ElicitService {
    pipeline: Pipeline,
    config: PipelineConfig,
    repro_config: ReproConfig,
    analyses: JobArena<AnalysisJob>,
    repro_jobs: JobArena<ReproJob>,
}

impl ElicitService {
    pub fn new(provider: Arc<dyn TextGenerator>, config: PipelineConfig) -> Self {
        Self {
            pipeline: Pipeline::new(provider, config.clone()),
            config,
            repro_config: ReproConfig::default(),
            analyses: JobArena::new(),
            repro_jobs: JobArena::new(),
        }
    }

    pub fn with_repro_config(mut self, repro_config: ReproConfig) -> Self {
        self.repro_config = repro_config;
        self
    }

    /// Start an analysis job; returns immediately with its id.
    pub async fn submit_analysis(&self, request: AnalysisRequest) -> Result<Uuid, ServiceError> {
        let params = self.pipeline_params(
            &request.product,
            &request.design_context,
            request.n_agents,
            request.mode,
        )?;

        let id = Uuid::new_v4();
        self.analyses
            .insert(id, AnalysisJob::new(id, params.clone()))
            .await;

        tracing::info!(job_id = %id, product = %params.product, n_agents = params.n_agents, "Analysis submitted");
        tokio::spawn(run_analysis_job(
            self.analyses.clone(),
            id,
            self.pipeline.clone(),
            params,
        ));

        Ok(id)
    }

    /// Poll the progress of an analysis job.
    pub async fn analysis_status(&self, id: Uuid) -> Result<AnalysisStatus, ServiceError> {
        let job = self.analyses.get(id).await?;
        Ok(AnalysisStatus {
            id: job.id,
            status: job.status,
            progress: job.progress,
            agents_generated: job.partial.agents.len(),
            experiences_completed: job.partial.experiences.len(),
            interviews_completed: job.partial.interviews.len(),
            needs_extracted: job.partial.needs.len(),
            partial: job.partial,
            warnings: job.warnings,
            error: job.error,
        })
    }

    /// Fetch the results of an analysis job. Before completion this is not
    /// an error: `completed` is false and `partial` holds the buffers.
    pub async fn analysis_results(&self, id: Uuid) -> Result<AnalysisResults, ServiceError> {
        let job = self.analyses.get(id).await?;
        Ok(AnalysisResults {
            id: job.id,
            status: job.status,
            completed: job.status == JobStatus::Completed,
            result: job.result,
            partial: job.partial,
            warnings: job.warnings,
            error: job.error,
        })
    }

    /// Start a reproducibility batch; returns immediately with its id.
    pub async fn start_reproducibility(&self, request: ReproRequest) -> Result<Uuid, ServiceError> {
        let pipeline_params = self.pipeline_params(
            &request.product,
            &request.design_context,
            request.n_agents,
            request.mode,
        )?;
        if request.n_iterations == 0 || request.n_iterations > self.repro_config.max_iterations {
            return Err(ServiceError::InvalidRequest(format!(
                "n_iterations must be between 1 and {}",
                self.repro_config.max_iterations
            )));
        }

        let params = ReproParams {
            pipeline: pipeline_params,
            n_iterations: request.n_iterations,
        };
        let id = Uuid::new_v4();
        self.repro_jobs
            .insert(id, ReproJob::new(id, params.clone()))
            .await;

        tracing::info!(job_id = %id, n_iterations = params.n_iterations, "Reproducibility batch submitted");
        tokio::spawn(run_repro_job(
            self.repro_jobs.clone(),
            id,
            self.pipeline.clone(),
            params,
        ));

        Ok(id)
    }

    /// Poll the progress of a reproducibility job.
    pub async fn reproducibility_status(&self, id: Uuid) -> Result<ReproStatus, ServiceError> {
        let job = self.repro_jobs.get(id).await?;
        Ok(ReproStatus {
            id: job.id,
            status: job.status,
            progress: job.progress,
            completed_iterations: job.runs.len(),
            error: job.error,
        })
    }

    /// Fetch the final report of a reproducibility job. Unlike analysis
    /// results, asking before the batch finished is an error.
    pub async fn reproducibility_results(&self, id: Uuid) -> Result<ReproReport, ServiceError> {
        let job = self.repro_jobs.get(id).await?;
        match job.status {
            JobStatus::Completed => job.report.ok_or_else(|| {
                ServiceError::JobFailed("completed job is missing its report".to_string())
            }),
            JobStatus::Failed => Err(ServiceError::JobFailed(
                job.error.unwrap_or_else(|| "unknown failure".to_string()),
            )),
            status => Err(ServiceError::NotCompleted {
                status: status.to_string(),
            }),
        }
    }

    fn pipeline_params(
        &self,
        product: &str,
        design_context: &str,
        n_agents: Option<usize>,
        mode: ExecutionMode,
    ) -> Result<PipelineParams, ServiceError> {
        if product.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "product must not be empty".to_string(),
            ));
        }
        let n_agents = n_agents.unwrap_or(DEFAULT_AGENTS);
        if n_agents == 0 || n_agents > self.config.max_agents {
            return Err(ServiceError::InvalidRequest(format!(
                "n_agents must be between 1 and {}",
                self.config.max_agents
            )));
        }

        Ok(PipelineParams {
            product: product.trim().to_string(),
            design_context: design_context.trim().to_string(),
            n_agents,
            mode,
            questions: self.config.interview_questions.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockTextGenerator;

    fn service(mock: MockTextGenerator) -> ElicitService {
        ElicitService::new(Arc::new(mock), PipelineConfig::default())
    }

    fn request(n_agents: usize) -> AnalysisRequest {
        AnalysisRequest {
            product: "smart bike lock".to_string(),
            design_context: "urban commuting".to_string(),
            n_agents: Some(n_agents),
            mode: ExecutionMode::Parallel,
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_zero_agents() {
        let service = service(MockTextGenerator::new(3));
        let err = service
            .submit_analysis(request(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_product() {
        let service = service(MockTextGenerator::new(3));
        let err = service
            .submit_analysis(AnalysisRequest {
                product: "   ".to_string(),
                design_context: "ctx".to_string(),
                n_agents: Some(2),
                mode: ExecutionMode::Parallel,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let service = service(MockTextGenerator::new(3));
        let id = Uuid::new_v4();

        let err = service.analysis_status(id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(got) if got == id));

        let err = service.reproducibility_status(id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_repro_rejects_excess_iterations() {
        let service = service(MockTextGenerator::new(3));
        let err = service
            .start_reproducibility(ReproRequest {
                product: "p".to_string(),
                design_context: "c".to_string(),
                n_agents: Some(2),
                n_iterations: 1000,
                mode: ExecutionMode::Parallel,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_results_before_completion_is_not_an_error() {
        let service = service(MockTextGenerator::new(2));
        let id = service.submit_analysis(request(2)).await.unwrap();

        // Immediately after submission the job may not have finished;
        // either way the call succeeds.
        let results = service.analysis_results(id).await.unwrap();
        assert_eq!(results.id, id);
        if !results.completed {
            assert!(results.result.is_none());
        }
    }
}
