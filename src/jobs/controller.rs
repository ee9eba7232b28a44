//! The analysis job controller: runs one pipeline and mirrors its events
//! into the job arena.
//!
//! The controller is the only writer for its job, so terminal-state
//! immutability follows from control flow; the guard in `apply_event` is a
//! backstop. Pipeline events arrive over a channel from the run task, and
//! every mutation happens under the arena's write lock, so a poller never
//! observes a completed status without its result.

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::jobs::job::{AnalysisJob, JobStatus};
use crate::jobs::store::JobArena;
use crate::pipeline::{Pipeline, PipelineEvent, PipelineParams, TOTAL_STAGES};

/// Run one analysis job to a terminal state.
///
/// Expects the job record to already exist in the arena (status Queued).
pub async fn run_analysis_job(
    arena: JobArena<AnalysisJob>,
    id: Uuid,
    pipeline: Pipeline,
    params: PipelineParams,
) {
    let started = arena
        .update(id, |job| {
            job.status = JobStatus::Processing;
            job.progress.message = "Starting analysis".to_string();
            job.updated_at = Utc::now();
        })
        .await;
    if started.is_err() {
        tracing::error!(job_id = %id, "Analysis job record missing at start");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let run_handle = tokio::spawn({
        let pipeline = pipeline.clone();
        let params = params.clone();
        async move {
            pipeline
                .run(&params, move |event| {
                    // Receiver outlives the run; a send failure means the
                    // controller is gone and progress no longer matters.
                    let _ = tx.send(event);
                })
                .await
        }
    });

    while let Some(event) = rx.recv().await {
        apply_event(&arena, id, event).await;
    }

    let outcome = match run_handle.await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            tracing::error!(job_id = %id, error = %join_err, "Pipeline task panicked");
            fail_job(&arena, id, "pipeline task panicked".to_string()).await;
            return;
        }
    };

    match outcome {
        Ok(result) => {
            tracing::info!(job_id = %id, total_needs = result.aggregated.total_needs, "Analysis job completed");
            let _ = arena
                .update(id, |job| {
                    if job.is_terminal() {
                        return;
                    }
                    job.status = JobStatus::Completed;
                    job.progress.stage_number = TOTAL_STAGES;
                    job.progress.completed = true;
                    job.progress.message = "Analysis complete".to_string();
                    job.result = Some(result);
                    job.updated_at = Utc::now();
                })
                .await;
        }
        Err(err) => {
            tracing::warn!(job_id = %id, error = %err, "Analysis job failed");
            fail_job(&arena, id, err.to_string()).await;
        }
    }
}

async fn fail_job(arena: &JobArena<AnalysisJob>, id: Uuid, message: String) {
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
}

/// Mirror one pipeline event into the job record.
async fn apply_event(arena: &JobArena<AnalysisJob>, id: Uuid, event: PipelineEvent) {
    let _ = arena
        .update(id, |job| {
            if job.is_terminal() {
                return;
            }
            job.updated_at = Utc::now();
            match event {
                PipelineEvent::StageStarted { stage } => {
                    job.progress.stage = stage;
                    job.progress.stage_number = stage.number();
                    job.progress.message = format!("{}...", stage.label());
                }
                PipelineEvent::AgentGenerated {
                    agent,
                    index,
                    total,
                } => {
                    job.progress.message = format!("Generated agent {}/{}", index + 1, total);
                    job.partial.agents.push(agent);
                }
                PipelineEvent::ExperienceReady {
                    experience,
                    completed,
                    total,
                } => {
                    job.progress.message =
                        format!("Simulated experiences {}/{}", completed, total);
                    job.partial.experiences.push(experience);
                }
                PipelineEvent::InterviewReady {
                    interview,
                    completed,
                    total,
                } => {
                    job.progress.message = format!("Conducted interviews {}/{}", completed, total);
                    job.partial.interviews.push(interview);
                }
                PipelineEvent::NeedsReady {
                    needs,
                    completed,
                    total,
                } => {
                    job.progress.message = format!("Extracted needs {}/{}", completed, total);
                    job.partial.needs.extend(needs);
                }
                PipelineEvent::AgentDegraded { reason, .. } => {
                    job.warnings.push(reason);
                }
                PipelineEvent::StageFinished { .. } => {}
            }
        })
        .await;
}
