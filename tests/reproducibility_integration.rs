//! Integration tests for the reproducibility harness through the service
//! facade, using the deterministic offline provider.

use std::sync::Arc;
use std::time::Duration;

use elicit_forge::config::PipelineConfig;
use elicit_forge::jobs::JobStatus;
use elicit_forge::llm::MockTextGenerator;
use elicit_forge::pipeline::ExecutionMode;
use elicit_forge::repro::{ConsistencyRating, ReproReport};
use elicit_forge::service::{ElicitService, ReproRequest};
use elicit_forge::ServiceError;
use uuid::Uuid;

fn service_with(mock: MockTextGenerator) -> ElicitService {
    ElicitService::new(Arc::new(mock), PipelineConfig::default())
}

fn request(n_agents: usize, n_iterations: usize) -> ReproRequest {
    ReproRequest {
        product: "smart thermostat".to_string(),
        design_context: "rented apartments with shared heating".to_string(),
        n_agents: Some(n_agents),
        n_iterations,
        mode: ExecutionMode::Parallel,
    }
}

async fn wait_for_terminal(service: &ElicitService, id: Uuid) -> JobStatus {
    for _ in 0..500 {
        let status = service
            .reproducibility_status(id)
            .await
            .expect("job should exist while polling");
        if status.status.is_terminal() {
            return status.status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("reproducibility job did not reach a terminal state");
}

async fn run_to_report(service: &ElicitService, req: ReproRequest) -> ReproReport {
    let id = service
        .start_reproducibility(req)
        .await
        .expect("valid request");
    let status = wait_for_terminal(service, id).await;
    assert_eq!(status, JobStatus::Completed);
    service
        .reproducibility_results(id)
        .await
        .expect("completed job has a report")
}

#[tokio::test]
async fn test_identical_runs_score_perfect_consistency() {
    let service = service_with(MockTextGenerator::new(3));
    let report = run_to_report(&service, request(3, 3)).await;

    assert_eq!(report.metadata.total_iterations, 3);
    assert_eq!(report.metadata.successful_iterations, 3);
    assert_eq!(report.runs.len(), 3);
    assert!(report.runs.iter().all(|run| run.success));

    let metrics = &report.metrics;
    assert_eq!(metrics.sample_size, 3);
    assert_eq!(metrics.agent.score, 1.0);
    assert_eq!(metrics.category.score, 1.0);
    assert_eq!(metrics.priority.score, 1.0);
    assert_eq!(metrics.statement.score, 1.0);
    assert_eq!(metrics.interview.score, 1.0);
    assert_eq!(metrics.composite, 1.0);
    assert_eq!(metrics.rating, ConsistencyRating::Excellent);
}

#[tokio::test]
async fn test_failed_iterations_are_recorded_and_excluded() {
    let mock = MockTextGenerator::new(2).with_failing_runs([2, 4]);
    let service = service_with(mock);
    let report = run_to_report(&service, request(2, 5)).await;

    assert_eq!(report.metadata.total_iterations, 5);
    assert_eq!(report.metadata.successful_iterations, 3);
    assert_eq!(report.runs.len(), 5);
    assert!(!report.runs[1].success);
    assert!(!report.runs[3].success);
    assert!(report.runs[1].error.is_some());
    assert!(report.runs[1].result.is_none());

    // The surviving iterations are byte-identical, so the metrics over
    // them are still perfect.
    assert_eq!(report.metrics.sample_size, 3);
    assert_eq!(report.metrics.composite, 1.0);
}

#[tokio::test]
async fn test_all_iterations_failing_fails_the_job() {
    let mock = MockTextGenerator::new(2).with_failing_runs([1, 2, 3]);
    let service = service_with(mock);
    let id = service
        .start_reproducibility(request(2, 3))
        .await
        .expect("valid request");

    let status = wait_for_terminal(&service, id).await;
    assert_eq!(status, JobStatus::Failed);

    let err = service.reproducibility_results(id).await.unwrap_err();
    match err {
        ServiceError::JobFailed(message) => {
            assert!(
                message.contains("no successful runs"),
                "unexpected message: {}",
                message
            );
        }
        other => panic!("expected JobFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_results_before_terminal_is_not_completed() {
    let service = service_with(MockTextGenerator::new(2));
    let id = service
        .start_reproducibility(request(2, 2))
        .await
        .expect("valid request");

    // The background task has not been polled yet.
    let err = service.reproducibility_results(id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotCompleted { .. }));
}

#[tokio::test]
async fn test_unknown_repro_id_is_not_found() {
    let service = service_with(MockTextGenerator::new(2));
    let err = service
        .reproducibility_results(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_single_iteration_report_is_defined() {
    let service = service_with(MockTextGenerator::new(2));
    let report = run_to_report(&service, request(2, 1)).await;

    assert_eq!(report.metrics.sample_size, 1);
    assert_eq!(report.metrics.composite, 1.0);
}
