//! Deterministic scripted text generator for tests and offline runs.
//!
//! `MockTextGenerator` answers every stage with a canned response derived
//! from a fixed cast of personas, so repeated pipeline runs on the same
//! input produce byte-identical outputs. Failure injection covers two
//! shapes: individual call ordinals (to exercise per-agent degradation) and
//! whole iterations (to exercise the reproducibility harness's handling of
//! failed runs).

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::LlmError;
use crate::llm::TextGenerator;
use crate::pipeline::PipelineStage;

/// Fixed persona cast cycled through by agent index.
const NAMES: [&str; 6] = [
    "Maya Chen",
    "Derek Okafor",
    "Priya Nair",
    "Tomas Alvarez",
    "Elena Petrova",
    "Marcus Webb",
];
const AGES: [u32; 6] = [34, 52, 28, 45, 61, 39];
const GENDERS: [&str; 6] = ["Female", "Male", "Female", "Male", "Female", "Male"];

/// Per-stage call counters behind the mutex.
#[derive(Debug, Default)]
struct MockState {
    total_calls: usize,
    generation_calls: usize,
    simulation_calls: usize,
    interview_calls: usize,
    extraction_calls: usize,
}

/// Deterministic scripted provider with failure injection.
///
/// Persona generation always issues exactly `agents_per_run` calls per
/// pipeline run (degraded agents still consume a call), so the current run
/// number is `generation_calls / agents_per_run + 1`. Per-stage response
/// indices cycle modulo `agents_per_run`, which keeps successive runs
/// byte-identical.
pub struct MockTextGenerator {
    state: Mutex<MockState>,
    /// Persona generation calls per pipeline run; drives run accounting.
    agents_per_run: usize,
    /// Global call ordinals (0-based) that fail with a provider error.
    fail_calls: HashSet<usize>,
    /// 1-based run numbers whose persona generation calls all fail,
    /// sinking the whole iteration.
    fail_runs: HashSet<usize>,
}

impl MockTextGenerator {
    /// Create a mock for runs of `agents_per_run` agents that succeeds on
    /// every call.
    pub fn new(agents_per_run: usize) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            agents_per_run: agents_per_run.max(1),
            fail_calls: HashSet::new(),
            fail_runs: HashSet::new(),
        }
    }

    /// Fail the given global call ordinals (0-based across all stages).
    pub fn with_failing_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_calls = calls.into_iter().collect();
        self
    }

    /// Fail every persona generation call in the given 1-based run numbers.
    pub fn with_failing_runs(mut self, runs: impl IntoIterator<Item = usize>) -> Self {
        self.fail_runs = runs.into_iter().collect();
        self
    }

    /// Total number of calls observed so far.
    pub fn call_count(&self) -> usize {
        self.state
            .lock()
            .expect("mock state lock poisoned")
            .total_calls
    }

    fn persona_response(idx: usize) -> String {
        let slot = idx % NAMES.len();
        format!(
            "**Name**: {name}\n\
             **Age**: {age}\n\
             **Gender**: {gender}\n\
             **Description**: {name} relies on the product during a typical week and \
             cares about getting through tasks without friction.\n\
             **Rationale**: Adds the perspective of persona number {n}.\n",
            name = NAMES[slot],
            age = AGES[slot],
            gender = GENDERS[slot],
            n = idx + 1,
        )
    }

    fn experience_response(idx: usize) -> String {
        format!(
            "Step 1:\n\
             Action: Unboxed the product and followed the setup guide for profile {n}.\n\
             Observation: Setup took longer than the guide suggested.\n\
             Challenge: The pairing instructions were ambiguous.\n\
             \n\
             Step 2:\n\
             Action: Used the product for a routine task.\n\
             Observation: The main flow worked but required extra confirmation taps.\n\
             Challenge: Remembering which mode was active was confusing.\n",
            n = idx + 1,
        )
    }

    fn interview_response(idx: usize) -> String {
        format!(
            "A1: The setup flow frustrated me most; the pairing step for profile {n} \
             failed twice before it worked.\n\
             A2: I would change the mode indicator so the active state is always visible.\n\
             A3: I would recommend it once the confirmation taps are reduced.\n",
            n = idx + 1,
        )
    }

    fn extraction_response(idx: usize) -> String {
        format!(
            r#"{{
  "needs": [
    {{
      "category": "Usability",
      "need_statement": "Users need a pairing flow that succeeds on the first attempt.",
      "evidence": "The pairing step for profile {n} failed twice before it worked.",
      "priority": "High",
      "design_implication": "Redesign pairing with explicit progress and recovery steps."
    }},
    {{
      "category": "Functional",
      "need_statement": "Users need the active mode to be visible at a glance.",
      "evidence": "Remembering which mode was active was confusing.",
      "priority": "Medium",
      "design_implication": "Add a persistent mode indicator to the primary display."
    }}
  ]
}}"#,
            n = idx + 1,
        )
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn generate(&self, stage: PipelineStage, _prompt: &str) -> Result<String, LlmError> {
        let mut state = self.state.lock().expect("mock state lock poisoned");

        let call_ordinal = state.total_calls;
        state.total_calls += 1;

        if self.fail_calls.contains(&call_ordinal) {
            return Err(LlmError::ApiError {
                code: 500,
                message: format!("injected failure for call {}", call_ordinal),
            });
        }

        let response = match stage {
            PipelineStage::GeneratingAgents => {
                let run = state.generation_calls / self.agents_per_run + 1;
                let idx = state.generation_calls % self.agents_per_run;
                state.generation_calls += 1;

                if self.fail_runs.contains(&run) {
                    return Err(LlmError::ApiError {
                        code: 500,
                        message: format!("injected failure for run {}", run),
                    });
                }
                Self::persona_response(idx)
            }
            PipelineStage::SimulatingExperiences => {
                let idx = state.simulation_calls % self.agents_per_run;
                state.simulation_calls += 1;
                Self::experience_response(idx)
            }
            PipelineStage::ConductingInterviews => {
                let idx = state.interview_calls % self.agents_per_run;
                state.interview_calls += 1;
                Self::interview_response(idx)
            }
            PipelineStage::ExtractingNeeds => {
                let idx = state.extraction_calls % self.agents_per_run;
                state.extraction_calls += 1;
                Self::extraction_response(idx)
            }
        };

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_personas_are_distinct() {
        let mock = MockTextGenerator::new(3);
        let first = mock
            .generate(PipelineStage::GeneratingAgents, "first persona")
            .await
            .unwrap();
        let second = mock
            .generate(PipelineStage::GeneratingAgents, "next persona")
            .await
            .unwrap();

        assert!(first.contains("Maya Chen"));
        assert!(second.contains("Derek Okafor"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_mock_responses_repeat_across_runs() {
        let mock = MockTextGenerator::new(2);

        let run1: Vec<String> = vec![
            mock.generate(PipelineStage::GeneratingAgents, "p1")
                .await
                .unwrap(),
            mock.generate(PipelineStage::GeneratingAgents, "p2")
                .await
                .unwrap(),
        ];
        let run2: Vec<String> = vec![
            mock.generate(PipelineStage::GeneratingAgents, "p1")
                .await
                .unwrap(),
            mock.generate(PipelineStage::GeneratingAgents, "p2")
                .await
                .unwrap(),
        ];

        assert_eq!(run1, run2);
    }

    #[tokio::test]
    async fn test_failing_call_injection() {
        let mock = MockTextGenerator::new(3).with_failing_calls([1]);

        assert!(mock
            .generate(PipelineStage::GeneratingAgents, "p1")
            .await
            .is_ok());
        assert!(mock
            .generate(PipelineStage::SimulatingExperiences, "simulate")
            .await
            .is_err());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_run_injection() {
        let mock = MockTextGenerator::new(2).with_failing_runs([2]);

        // Run 1: both generation calls succeed
        assert!(mock
            .generate(PipelineStage::GeneratingAgents, "p1")
            .await
            .is_ok());
        assert!(mock
            .generate(PipelineStage::GeneratingAgents, "p2")
            .await
            .is_ok());
        // Run 2: every generation call fails
        assert!(mock
            .generate(PipelineStage::GeneratingAgents, "p1")
            .await
            .is_err());
        assert!(mock
            .generate(PipelineStage::GeneratingAgents, "p2")
            .await
            .is_err());
        // Run 3 succeeds again
        assert!(mock
            .generate(PipelineStage::GeneratingAgents, "p1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_extraction_response_is_valid_json() {
        let mock = MockTextGenerator::new(3);
        let response = mock
            .generate(PipelineStage::ExtractingNeeds, "extract")
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert!(value["needs"].is_array());
    }
}
