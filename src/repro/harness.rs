//! Reproducibility harness: run the same pipeline N times and reduce the
//! outcomes into a consistency report.
//!
//! Iterations run strictly sequentially so each one sees the same
//! conditions. A failed iteration is recorded and the batch continues; the
//! job itself fails only when no iteration succeeded, because there is
//! nothing to compare.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::MetricsError;
use crate::jobs::{JobArena, JobStatus};
use crate::pipeline::{Pipeline, PipelineEvent, PipelineParams, PipelineResult, PipelineStage};
use crate::repro::metrics::{compute_metrics, ConsistencyReport};

/// Input parameters for a reproducibility batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproParams {
    /// The pipeline input repeated every iteration.
    pub pipeline: PipelineParams,
    pub n_iterations: usize,
}

/// Where the batch currently is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproProgress {
    /// 1-based iteration currently running.
    pub iteration: usize,
    pub total: usize,
    pub stage: PipelineStage,
    pub message: String,
    pub elapsed_secs: f64,
    /// Mean completed-iteration duration times remaining iterations.
    /// None until one iteration has finished.
    pub eta_secs: Option<f64>,
}

/// Record of one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproRun {
    /// 1-based iteration number.
    pub iteration: usize,
    pub success: bool,
    pub duration_secs: f64,
    pub error: Option<String>,
    pub result: Option<PipelineResult>,
}

/// Batch-level facts carried in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproMetadata {
    pub product: String,
    pub design_context: String,
    pub n_agents: usize,
    pub total_iterations: usize,
    pub successful_iterations: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_duration_secs: f64,
}

/// Final output of a reproducibility job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproReport {
    pub metadata: ReproMetadata,
    pub runs: Vec<ReproRun>,
    pub metrics: ConsistencyReport,
}

/// The poll-visible record of one reproducibility job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproJob {
    pub id: Uuid,
    pub params: ReproParams,
    pub status: JobStatus,
    pub progress: ReproProgress,
    pub runs: Vec<ReproRun>,
    pub report: Option<ReproReport>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReproJob {
    pub fn new(id: Uuid, params: ReproParams) -> Self {
        let now = Utc::now();
        let total = params.n_iterations;
        Self {
            id,
            params,
            status: JobStatus::Queued,
            progress: ReproProgress {
                iteration: 0,
                total,
                stage: PipelineStage::GeneratingAgents,
                message: "Queued".to_string(),
                elapsed_secs: 0.0,
                eta_secs: None,
            },
            runs: Vec::new(),
            report: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Run one reproducibility job to a terminal state.
///
/// Expects the job record to already exist in the arena (status Queued).
pub async fn run_repro_job(
    arena: JobArena<ReproJob>,
    id: Uuid,
    pipeline: Pipeline,
    params: ReproParams,
) {
    let total = params.n_iterations;
    let started_at = Utc::now();
    let batch_start = Instant::now();

    let started = arena
        .update(id, |job| {
            job.status = JobStatus::Processing;
            job.progress.message = "Starting reproducibility batch".to_string();
            job.updated_at = Utc::now();
        })
        .await;
    if started.is_err() {
        tracing::error!(job_id = %id, "Reproducibility job record missing at start");
        return;
    }

    let mut durations: Vec<f64> = Vec::with_capacity(total);
    let mut successes: Vec<PipelineResult> = Vec::new();
    let mut runs: Vec<ReproRun> = Vec::with_capacity(total);

    for iteration in 1..=total {
        let remaining = (total - iteration + 1) as f64;
        let eta_secs = if durations.is_empty() {
            None
        } else {
            let mean = durations.iter().sum::<f64>() / durations.len() as f64;
            Some(mean * remaining)
        };
        let elapsed = batch_start.elapsed().as_secs_f64();
        let _ = arena
            .update(id, |job| {
                job.progress.iteration = iteration;
                job.progress.message = format!("Iteration {}/{}", iteration, total);
                job.progress.elapsed_secs = elapsed;
                job.progress.eta_secs = eta_secs;
                job.updated_at = Utc::now();
            })
            .await;

        tracing::info!(job_id = %id, iteration, total, "Starting iteration");

        let iter_start = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run_handle = tokio::spawn({
            let pipeline = pipeline.clone();
            let pipeline_params = params.pipeline.clone();
            async move {
                pipeline
                    .run(&pipeline_params, move |event| {
                        let _ = tx.send(event);
                    })
                    .await
            }
        });

        while let Some(event) = rx.recv().await {
            if let PipelineEvent::StageStarted { stage } = event {
                let elapsed = batch_start.elapsed().as_secs_f64();
                let _ = arena
                    .update(id, |job| {
                        job.progress.stage = stage;
                        job.progress.message =
                            format!("Iteration {}/{} - {}...", iteration, total, stage.label());
                        job.progress.elapsed_secs = elapsed;
                        job.updated_at = Utc::now();
                    })
                    .await;
            }
        }

        let duration_secs = iter_start.elapsed().as_secs_f64();
        durations.push(duration_secs);

        let run = match run_handle.await {
            Ok(Ok(result)) => {
                successes.push(result.clone());
                ReproRun {
                    iteration,
                    success: true,
                    duration_secs,
                    error: None,
                    result: Some(result),
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(job_id = %id, iteration, error = %err, "Iteration failed");
                ReproRun {
                    iteration,
                    success: false,
                    duration_secs,
                    error: Some(err.to_string()),
                    result: None,
                }
            }
            Err(join_err) => {
                tracing::error!(job_id = %id, iteration, error = %join_err, "Iteration task panicked");
                ReproRun {
                    iteration,
                    success: false,
                    duration_secs,
                    error: Some("pipeline task panicked".to_string()),
                    result: None,
                }
            }
        };

        runs.push(run.clone());
        let _ = arena
            .update(id, |job| {
                job.runs.push(run);
                job.updated_at = Utc::now();
            })
            .await;
    }

    let finished_at = Utc::now();
    let total_duration_secs = batch_start.elapsed().as_secs_f64();

    if successes.is_empty() {
        let message = MetricsError::InsufficientData.to_string();
        tracing::warn!(job_id = %id, "All iterations failed");
        let _ = arena
            .update(id, |job| {
                if job.is_terminal() {
                    return;
                }
                job.status = JobStatus::Failed;
                job.progress.message = format!("Failed: {}", message);
                job.error = Some(message);
                job.updated_at = Utc::now();
            })
            .await;
        return;
    }

    let metrics = match compute_metrics(&successes) {
        Ok(metrics) => metrics,
        Err(err) => {
            let message = err.to_string();
            let _ = arena
                .update(id, |job| {
                    if job.is_terminal() {
                        return;
                    }
                    job.status = JobStatus::Failed;
                    job.progress.message = format!("Failed: {}", message);
                    job.error = Some(message);
                    job.updated_at = Utc::now();
                })
                .await;
            return;
        }
    };

    let report = ReproReport {
        metadata: ReproMetadata {
            product: params.pipeline.product.clone(),
            design_context: params.pipeline.design_context.clone(),
            n_agents: params.pipeline.n_agents,
            total_iterations: total,
            successful_iterations: successes.len(),
            started_at,
            finished_at,
            total_duration_secs,
        },
        runs,
        metrics,
    };

    tracing::info!(
        job_id = %id,
        successful_iterations = report.metadata.successful_iterations,
        composite = report.metrics.composite,
        rating = %report.metrics.rating,
        "Reproducibility job completed"
    );

    let _ = arena
        .update(id, |job| {
            if job.is_terminal() {
                return;
            }
            job.status = JobStatus::Completed;
            job.progress.message = "Reproducibility batch complete".to_string();
            job.progress.eta_secs = Some(0.0);
            job.report = Some(report);
            job.updated_at = Utc::now();
        })
        .await;
}
