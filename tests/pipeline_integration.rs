//! Integration tests for the analysis pipeline through the service facade.
//!
//! These tests use the deterministic offline provider, so they run without
//! network access or API keys.

use std::sync::Arc;
use std::time::Duration;

use elicit_forge::config::PipelineConfig;
use elicit_forge::jobs::JobStatus;
use elicit_forge::llm::MockTextGenerator;
use elicit_forge::pipeline::{ExecutionMode, TOTAL_STAGES};
use elicit_forge::service::{AnalysisRequest, AnalysisResults, ElicitService};
use elicit_forge::ServiceError;
use uuid::Uuid;

fn service_with(mock: MockTextGenerator) -> ElicitService {
    ElicitService::new(Arc::new(mock), PipelineConfig::default())
}

fn request(n_agents: usize, mode: ExecutionMode) -> AnalysisRequest {
    AnalysisRequest {
        product: "smart thermostat".to_string(),
        design_context: "rented apartments with shared heating".to_string(),
        n_agents: Some(n_agents),
        mode,
    }
}

async fn wait_for_terminal(service: &ElicitService, id: Uuid) -> AnalysisResults {
    for _ in 0..500 {
        let status = service
            .analysis_status(id)
            .await
            .expect("job should exist while polling");
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    service
        .analysis_results(id)
        .await
        .expect("results for a known job")
}

#[tokio::test]
async fn test_end_to_end_analysis_three_agents() {
    let service = service_with(MockTextGenerator::new(3));
    let id = service
        .submit_analysis(request(3, ExecutionMode::Parallel))
        .await
        .expect("valid request");

    let results = wait_for_terminal(&service, id).await;
    assert_eq!(results.status, JobStatus::Completed);
    assert!(results.completed);
    assert!(results.error.is_none());

    let result = results.result.expect("completed job has a result");
    assert_eq!(result.agents.len(), 3);
    assert_eq!(result.experiences.len(), 3);
    assert_eq!(result.interviews.len(), 3);

    // The offline provider extracts two needs per agent.
    assert_eq!(result.aggregated.total_needs, 6);
    assert_eq!(result.aggregated.needs.len(), 6);
    let by_category: usize = result.aggregated.by_category.values().sum();
    let by_priority: usize = result.aggregated.by_priority.values().sum();
    assert_eq!(by_category, result.aggregated.total_needs);
    assert_eq!(by_priority, result.aggregated.total_needs);

    // Records are ordered by agent id regardless of dispatch order.
    for (i, agent) in result.agents.iter().enumerate() {
        assert_eq!(agent.id, i);
    }
    for (i, exp) in result.experiences.iter().enumerate() {
        assert_eq!(exp.agent_id, i);
    }
    for (i, interview) in result.interviews.iter().enumerate() {
        assert_eq!(interview.agent_id, i);
        assert!(!interview.exchanges.is_empty());
    }

    assert_eq!(result.stage_durations.len(), TOTAL_STAGES as usize);
}

#[tokio::test]
async fn test_sequential_mode_matches_parallel_shape() {
    let service = service_with(MockTextGenerator::new(2));
    let id = service
        .submit_analysis(request(2, ExecutionMode::Sequential))
        .await
        .expect("valid request");

    let results = wait_for_terminal(&service, id).await;
    let result = results.result.expect("completed job has a result");
    assert_eq!(result.agents.len(), 2);
    assert_eq!(result.aggregated.total_needs, 4);
}

#[tokio::test]
async fn test_progress_is_monotone_across_polls() {
    let service = service_with(MockTextGenerator::new(3));
    let id = service
        .submit_analysis(request(3, ExecutionMode::Parallel))
        .await
        .expect("valid request");

    let mut last_stage = 0u32;
    let mut last_agents = 0usize;
    let mut last_needs = 0usize;
    for _ in 0..500 {
        let status = service.analysis_status(id).await.expect("job exists");
        assert!(status.progress.stage_number >= last_stage);
        assert!(status.agents_generated >= last_agents);
        assert!(status.needs_extracted >= last_needs);
        last_stage = status.progress.stage_number;
        last_agents = status.agents_generated;
        last_needs = status.needs_extracted;
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let status = service.analysis_status(id).await.expect("job exists");
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress.stage_number, TOTAL_STAGES);
    assert!(status.progress.completed);
}

#[tokio::test]
async fn test_terminal_state_is_stable_across_polls() {
    let service = service_with(MockTextGenerator::new(2));
    let id = service
        .submit_analysis(request(2, ExecutionMode::Parallel))
        .await
        .expect("valid request");

    wait_for_terminal(&service, id).await;

    let first = service.analysis_status(id).await.expect("job exists");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = service.analysis_status(id).await.expect("job exists");
    assert_eq!(first.status, second.status);
    assert_eq!(first.progress.message, second.progress.message);
    assert_eq!(first.agents_generated, second.agents_generated);
    assert_eq!(first.needs_extracted, second.needs_extracted);
}

#[tokio::test]
async fn test_degraded_agent_surfaces_warning_but_completes() {
    // With two agents, calls 0-1 are persona generations and calls 2-3 are
    // experience simulations. Failing call 3 degrades agent 1's experience.
    let mock = MockTextGenerator::new(2).with_failing_calls([3]);
    let service = service_with(mock);
    let id = service
        .submit_analysis(request(2, ExecutionMode::Sequential))
        .await
        .expect("valid request");

    let results = wait_for_terminal(&service, id).await;
    assert_eq!(results.status, JobStatus::Completed);
    assert_eq!(results.warnings.len(), 1);

    let result = results.result.expect("degraded runs still complete");
    assert_eq!(result.experiences.len(), 2);
    assert!(result.experiences[1].steps.is_empty());
    assert!(!result.experiences[0].steps.is_empty());
}

#[tokio::test]
async fn test_status_exposes_partial_buffers() {
    let service = service_with(MockTextGenerator::new(3));
    let id = service
        .submit_analysis(request(3, ExecutionMode::Parallel))
        .await
        .expect("valid request");

    wait_for_terminal(&service, id).await;

    // A single status poll carries the buffers themselves, not only counts.
    let status = service.analysis_status(id).await.expect("job exists");
    assert_eq!(status.partial.agents.len(), status.agents_generated);
    assert_eq!(status.partial.experiences.len(), status.experiences_completed);
    assert_eq!(status.partial.interviews.len(), status.interviews_completed);
    assert_eq!(status.partial.needs.len(), status.needs_extracted);
    assert_eq!(status.partial.agents.len(), 3);
    assert_eq!(status.partial.needs.len(), 6);
}

#[tokio::test]
async fn test_failed_persona_slot_is_skipped() {
    // With three agents, calls 0-2 are persona generations. Failing call 0
    // skips one slot; the run continues with the two remaining personas.
    let mock = MockTextGenerator::new(3).with_failing_calls([0]);
    let service = service_with(mock);
    let id = service
        .submit_analysis(request(3, ExecutionMode::Sequential))
        .await
        .expect("valid request");

    let results = wait_for_terminal(&service, id).await;
    assert_eq!(results.status, JobStatus::Completed);
    assert_eq!(results.warnings.len(), 1);
    assert!(results.warnings[0].contains("persona"));

    let result = results.result.expect("completed job has a result");
    // n_agents is the requested count; the delivered records are fewer.
    assert_eq!(result.n_agents, 3);
    assert_eq!(result.agents.len(), 2);
    assert_eq!(result.experiences.len(), 2);
    assert_eq!(result.interviews.len(), 2);
    assert_eq!(result.aggregated.total_needs, 4);
}

#[tokio::test]
async fn test_persona_stage_collapse_fails_job() {
    let mock = MockTextGenerator::new(2).with_failing_runs([1]);
    let service = service_with(mock);
    let id = service
        .submit_analysis(request(2, ExecutionMode::Parallel))
        .await
        .expect("valid request");

    let results = wait_for_terminal(&service, id).await;
    assert_eq!(results.status, JobStatus::Failed);
    assert!(!results.completed);
    assert!(results.result.is_none());
    let error = results.error.expect("failed job records its error");
    assert!(error.contains("persona"), "unexpected error: {}", error);
}

#[tokio::test]
async fn test_unknown_job_id_is_not_found() {
    let service = service_with(MockTextGenerator::new(2));
    let id = Uuid::new_v4();

    let err = service.analysis_results(id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(got) if got == id));
}

#[tokio::test]
async fn test_results_before_completion_returns_partial_shape() {
    let service = service_with(MockTextGenerator::new(2));
    let id = service
        .submit_analysis(request(2, ExecutionMode::Parallel))
        .await
        .expect("valid request");

    // The background task has not been polled yet, so the job is still
    // queued. Fetching results is not an error.
    let results = service.analysis_results(id).await.expect("known job");
    assert_eq!(results.status, JobStatus::Queued);
    assert!(!results.completed);
    assert!(results.result.is_none());
    assert!(results.partial.agents.is_empty());
}
