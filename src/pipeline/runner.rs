//! The pipeline runner: drives one elicitation run through all four stages.
//!
//! The runner owns stage ordering and timing and emits [`PipelineEvent`]s
//! through a caller-supplied callback. It never touches job state itself;
//! the job controller and the reproducibility harness translate events into
//! their own bookkeeping, which keeps the runner reusable for both.

use chrono::Utc;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::llm::TextGenerator;
use crate::pipeline::stages::StageExecutor;
use crate::pipeline::types::{
    aggregate_needs, Agent, Experience, Interview, Need, PipelineParams, PipelineResult,
    PipelineStage,
};

/// Events emitted while a run progresses, in occurrence order.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted {
        stage: PipelineStage,
    },
    AgentGenerated {
        agent: Agent,
        index: usize,
        total: usize,
    },
    ExperienceReady {
        experience: Experience,
        completed: usize,
        total: usize,
    },
    InterviewReady {
        interview: Interview,
        completed: usize,
        total: usize,
    },
    NeedsReady {
        needs: Vec<Need>,
        completed: usize,
        total: usize,
    },
    /// A per-agent failure was absorbed; the run continues with a
    /// placeholder record.
    AgentDegraded {
        stage: PipelineStage,
        agent_id: usize,
        reason: String,
    },
    StageFinished {
        stage: PipelineStage,
        duration_secs: f64,
    },
}

/// Drives the four elicitation stages for one run.
#[derive(Clone)]
pub struct Pipeline {
    provider: Arc<dyn TextGenerator>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn TextGenerator>, config: PipelineConfig) -> Self {
        Self { provider, config }
    }

    /// Run the pipeline once, emitting events as work completes.
    ///
    /// Per-agent provider failures degrade individual records and surface
    /// in the result's warnings; the run itself fails only when no agents
    /// were requested or stage 1 produced none.
    pub async fn run(
        &self,
        params: &PipelineParams,
        on_event: impl Fn(PipelineEvent) + Send + Sync,
    ) -> Result<PipelineResult, JobError> {
        if params.n_agents == 0 {
            return Err(JobError::NoAgents(0));
        }

        let started_at = Utc::now();
        let run_start = Instant::now();
        let warnings: Mutex<Vec<String>> = Mutex::new(Vec::new());

        // Degraded-agent reasons double as run warnings.
        let sink = |event: PipelineEvent| {
            if let PipelineEvent::AgentDegraded { reason, .. } = &event {
                warnings
                    .lock()
                    .expect("warnings lock poisoned")
                    .push(reason.clone());
            }
            on_event(event);
        };
        let sink: &(dyn Fn(PipelineEvent) + Send + Sync) = &sink;

        let executor = StageExecutor::new(
            self.provider.clone(),
            params.mode,
            self.config.max_concurrent_calls,
        );
        let mut stage_durations = std::collections::BTreeMap::new();

        tracing::info!(
            product = %params.product,
            n_agents = params.n_agents,
            mode = %params.mode,
            "Starting elicitation run"
        );

        // Stage 1: personas
        let stage_start = Instant::now();
        sink(PipelineEvent::StageStarted {
            stage: PipelineStage::GeneratingAgents,
        });
        let agents = executor.generate_agents(params, sink).await?;
        self.finish_stage(
            PipelineStage::GeneratingAgents,
            stage_start,
            &mut stage_durations,
            sink,
        );

        // Stage 2: experiences
        let stage_start = Instant::now();
        sink(PipelineEvent::StageStarted {
            stage: PipelineStage::SimulatingExperiences,
        });
        let experiences = executor.simulate_experiences(params, &agents, sink).await;
        self.finish_stage(
            PipelineStage::SimulatingExperiences,
            stage_start,
            &mut stage_durations,
            sink,
        );

        // Stage 3: interviews
        let stage_start = Instant::now();
        sink(PipelineEvent::StageStarted {
            stage: PipelineStage::ConductingInterviews,
        });
        let interviews = executor
            .conduct_interviews(params, &agents, &experiences, sink)
            .await;
        self.finish_stage(
            PipelineStage::ConductingInterviews,
            stage_start,
            &mut stage_durations,
            sink,
        );

        // Stage 4: needs
        let stage_start = Instant::now();
        sink(PipelineEvent::StageStarted {
            stage: PipelineStage::ExtractingNeeds,
        });
        let needs = executor
            .extract_needs(params, &agents, &interviews, sink)
            .await;
        self.finish_stage(
            PipelineStage::ExtractingNeeds,
            stage_start,
            &mut stage_durations,
            sink,
        );

        let aggregated = aggregate_needs(&needs);
        let finished_at = Utc::now();
        let duration_secs = run_start.elapsed().as_secs_f64();
        let warnings = warnings.into_inner().expect("warnings lock poisoned");

        tracing::info!(
            agents = agents.len(),
            total_needs = aggregated.total_needs,
            warnings = warnings.len(),
            duration_secs,
            "Elicitation run finished"
        );

        Ok(PipelineResult {
            product: params.product.clone(),
            design_context: params.design_context.clone(),
            n_agents: params.n_agents,
            mode: params.mode,
            started_at,
            finished_at,
            duration_secs,
            stage_durations,
            agents,
            experiences,
            interviews,
            aggregated,
            warnings,
        })
    }

    fn finish_stage(
        &self,
        stage: PipelineStage,
        stage_start: Instant,
        stage_durations: &mut std::collections::BTreeMap<String, f64>,
        sink: &(dyn Fn(PipelineEvent) + Send + Sync),
    ) {
        let duration_secs = stage_start.elapsed().as_secs_f64();
        stage_durations.insert(stage.label().to_string(), duration_secs);
        tracing::debug!(stage = %stage, duration_secs, "Stage finished");
        sink(PipelineEvent::StageFinished {
            stage,
            duration_secs,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockTextGenerator;
    use crate::pipeline::types::ExecutionMode;

    fn params(n_agents: usize, mode: ExecutionMode) -> PipelineParams {
        PipelineParams {
            product: "smart bike lock".to_string(),
            design_context: "urban commuting".to_string(),
            n_agents,
            mode,
            questions: vec![
                "What frustrated you most?".to_string(),
                "What would you change?".to_string(),
                "Would you recommend it?".to_string(),
            ],
        }
    }

    #[tokio::test]
    async fn test_run_produces_complete_result() {
        let provider = Arc::new(MockTextGenerator::new(3));
        let pipeline = Pipeline::new(provider, PipelineConfig::default());

        let result = pipeline
            .run(&params(3, ExecutionMode::Parallel), |_| {})
            .await
            .unwrap();

        assert_eq!(result.agents.len(), 3);
        assert_eq!(result.experiences.len(), 3);
        assert_eq!(result.interviews.len(), 3);
        assert_eq!(result.aggregated.total_needs, 6);
        assert_eq!(result.stage_durations.len(), 4);
        assert!(result.warnings.is_empty());

        // Outputs aligned by agent id
        for (i, agent) in result.agents.iter().enumerate() {
            assert_eq!(agent.id, i);
            assert_eq!(result.experiences[i].agent_id, i);
            assert_eq!(result.interviews[i].agent_id, i);
        }
    }

    #[tokio::test]
    async fn test_run_sequential_matches_parallel_shape() {
        let provider = Arc::new(MockTextGenerator::new(2));
        let pipeline = Pipeline::new(provider, PipelineConfig::default());

        let result = pipeline
            .run(&params(2, ExecutionMode::Sequential), |_| {})
            .await
            .unwrap();

        assert_eq!(result.agents.len(), 2);
        assert_eq!(result.aggregated.total_needs, 4);
    }

    #[tokio::test]
    async fn test_run_zero_agents_fails() {
        let provider = Arc::new(MockTextGenerator::new(3));
        let pipeline = Pipeline::new(provider, PipelineConfig::default());

        let err = pipeline
            .run(&params(0, ExecutionMode::Parallel), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::NoAgents(0)));
    }

    #[tokio::test]
    async fn test_run_degrades_on_single_failure() {
        // Call 4 is the second experience simulation (3 generations first)
        let provider = Arc::new(MockTextGenerator::new(3).with_failing_calls([4]));
        let pipeline = Pipeline::new(provider, PipelineConfig::default());

        let result = pipeline
            .run(&params(3, ExecutionMode::Sequential), |_| {})
            .await
            .unwrap();

        // Still one experience per agent, one of them a placeholder
        assert_eq!(result.experiences.len(), 3);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("experience simulation failed"));
        let placeholder = &result.experiences[1];
        assert!(placeholder.raw.is_empty());
        assert!(placeholder.steps.is_empty());
    }

    #[tokio::test]
    async fn test_run_fails_when_all_generations_fail() {
        let provider = Arc::new(MockTextGenerator::new(2).with_failing_runs([1]));
        let pipeline = Pipeline::new(provider, PipelineConfig::default());

        let err = pipeline
            .run(&params(2, ExecutionMode::Parallel), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::StageFailed { .. }));
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_stage_order() {
        let provider = Arc::new(MockTextGenerator::new(2));
        let pipeline = Pipeline::new(provider, PipelineConfig::default());
        let events: Mutex<Vec<u32>> = Mutex::new(Vec::new());

        pipeline
            .run(&params(2, ExecutionMode::Sequential), |event| {
                if let PipelineEvent::StageStarted { stage } = event {
                    events.lock().unwrap().push(stage.number());
                }
            })
            .await
            .unwrap();

        assert_eq!(*events.lock().unwrap(), vec![1, 2, 3, 4]);
    }
}
