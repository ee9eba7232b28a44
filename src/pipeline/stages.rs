//! Per-stage execution over the agent population.
//!
//! Stage 1 (persona generation) always runs sequentially because each
//! prompt embeds the personas generated before it. Stages 2-4 honor the
//! run's `ExecutionMode`: sequential in agent order, or parallel under a
//! semaphore fan-out cap with outputs re-sorted by agent id before the next
//! stage consumes them.
//!
//! A provider failure for one agent (after the provider's own retries)
//! degrades that single record: a placeholder with empty steps, empty
//! exchanges or zero needs is kept so every stage still yields one output
//! per agent, and the failure is surfaced as a warning. Only stage 1 can
//! fail the run, and only when it produces no agents at all.

use futures::future::join_all;
use regex::Regex;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::JobError;
use crate::llm::TextGenerator;
use crate::pipeline::runner::PipelineEvent;
use crate::pipeline::types::{
    Agent, Experience, ExperienceStep, ExecutionMode, Interview, Need, NeedCategory, NeedPriority,
    PipelineParams, PipelineStage, QaPair,
};
use crate::prompts;
use crate::utils::json_extraction::extract_json_from_response;

/// Callback receiving pipeline events as they occur.
pub type EventSink<'a> = &'a (dyn Fn(PipelineEvent) + Send + Sync);

/// Compiled patterns for parsing generated text into domain records.
pub struct ResponseParsers {
    name: Regex,
    age: Regex,
    gender: Regex,
    description: Regex,
    rationale: Regex,
    step_split: Regex,
    action: Regex,
    observation: Regex,
    challenge: Regex,
    answer_split: Regex,
}

impl ResponseParsers {
    pub fn new() -> Self {
        Self {
            name: Regex::new(r"(?m)^\*\*Name\*\*\s*:\s*(.+)$").expect("invalid name pattern"),
            age: Regex::new(r"(?m)^\*\*Age\*\*\s*:\s*(\d+)").expect("invalid age pattern"),
            gender: Regex::new(r"(?m)^\*\*Gender\*\*\s*:\s*(.+)$").expect("invalid gender pattern"),
            description: Regex::new(r"(?m)^\*\*Description\*\*\s*:\s*(.+)$")
                .expect("invalid description pattern"),
            rationale: Regex::new(r"(?m)^\*\*Rationale\*\*\s*:\s*(.+)$")
                .expect("invalid rationale pattern"),
            step_split: Regex::new(r"(?m)^\*{0,2}Step\s+\d+\*{0,2}\s*:?")
                .expect("invalid step pattern"),
            action: Regex::new(r"(?m)^\s*Action\s*:\s*(.+)$").expect("invalid action pattern"),
            observation: Regex::new(r"(?m)^\s*Observation\s*:\s*(.+)$")
                .expect("invalid observation pattern"),
            challenge: Regex::new(r"(?m)^\s*Challenge\s*:\s*(.+)$")
                .expect("invalid challenge pattern"),
            answer_split: Regex::new(r"(?m)^A\d+\s*[:.]\s*").expect("invalid answer pattern"),
        }
    }

    fn capture(&self, re: &Regex, text: &str) -> Option<String> {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Parse a persona markdown response. Missing optional fields stay
    /// None; a missing name falls back to a numbered placeholder.
    pub fn parse_agent(&self, id: usize, text: &str) -> Agent {
        let name = self
            .capture(&self.name, text)
            .unwrap_or_else(|| format!("Agent {}", id + 1));
        let age = self
            .capture(&self.age, text)
            .and_then(|s| s.parse::<u32>().ok());
        let gender = self.capture(&self.gender, text);
        let description = self
            .capture(&self.description, text)
            .unwrap_or_else(|| text.trim().to_string());
        let rationale = self.capture(&self.rationale, text).unwrap_or_default();

        Agent {
            id,
            name,
            age,
            gender,
            description,
            rationale,
        }
    }

    /// Parse numbered experience steps, best-effort. The raw narrative is
    /// kept by the caller regardless.
    pub fn parse_experience_steps(&self, text: &str) -> Vec<ExperienceStep> {
        self.step_split
            .split(text)
            .skip(1)
            .filter_map(|block| {
                let action = self.capture(&self.action, block)?;
                Some(ExperienceStep {
                    action,
                    observation: self.capture(&self.observation, block).unwrap_or_default(),
                    challenge: self.capture(&self.challenge, block).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Pair interview answers with the questions that were asked.
    ///
    /// Answers are split on `A<n>:` markers; questions without a matching
    /// answer get an empty one so the transcript stays aligned.
    pub fn parse_interview(&self, agent_id: usize, questions: &[String], text: &str) -> Interview {
        let answers: Vec<String> = self
            .answer_split
            .split(text)
            .skip(1)
            .map(|s| s.trim().to_string())
            .collect();

        let exchanges = questions
            .iter()
            .enumerate()
            .map(|(i, question)| QaPair {
                question: question.clone(),
                answer: answers.get(i).cloned().unwrap_or_default(),
            })
            .collect();

        Interview {
            agent_id,
            exchanges,
        }
    }
}

impl Default for ResponseParsers {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire shape of the need extraction response.
#[derive(Debug, serde::Deserialize)]
struct NeedsPayload {
    needs: Vec<RawNeed>,
}

#[derive(Debug, serde::Deserialize)]
struct RawNeed {
    category: String,
    need_statement: String,
    #[serde(default)]
    evidence: String,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    design_implication: String,
}

/// Executes one stage at a time over the whole agent population.
pub struct StageExecutor {
    provider: Arc<dyn TextGenerator>,
    mode: ExecutionMode,
    semaphore: Semaphore,
    parsers: ResponseParsers,
}

impl StageExecutor {
    pub fn new(provider: Arc<dyn TextGenerator>, mode: ExecutionMode, max_concurrent: usize) -> Self {
        Self {
            provider,
            mode,
            semaphore: Semaphore::new(max_concurrent.max(1)),
            parsers: ResponseParsers::new(),
        }
    }

    /// Stage 1: generate personas sequentially with context accumulation.
    ///
    /// A failed generation call skips that persona slot; the stage fails
    /// only when no persona could be generated at all.
    pub async fn generate_agents(
        &self,
        params: &PipelineParams,
        on_event: EventSink<'_>,
    ) -> Result<Vec<Agent>, JobError> {
        let mut agents: Vec<Agent> = Vec::with_capacity(params.n_agents);

        for index in 0..params.n_agents {
            let prompt =
                prompts::build_generation_prompt(&params.product, &params.design_context, &agents);

            match self
                .provider
                .generate(PipelineStage::GeneratingAgents, &prompt)
                .await
            {
                Ok(text) => {
                    let agent = self.parsers.parse_agent(agents.len(), &text);
                    tracing::debug!(agent_id = agent.id, name = %agent.name, "Generated persona");
                    on_event(PipelineEvent::AgentGenerated {
                        agent: agent.clone(),
                        index,
                        total: params.n_agents,
                    });
                    agents.push(agent);
                }
                Err(err) => {
                    tracing::warn!(index, error = %err, "Persona generation failed, skipping slot");
                    on_event(PipelineEvent::AgentDegraded {
                        stage: PipelineStage::GeneratingAgents,
                        agent_id: index,
                        reason: format!("persona generation failed: {}", err),
                    });
                }
            }
        }

        if agents.is_empty() {
            return Err(JobError::StageFailed {
                stage: PipelineStage::GeneratingAgents.label().to_string(),
                reason: "all persona generations failed".to_string(),
            });
        }

        Ok(agents)
    }

    /// Stage 2: simulate a product experience for every agent.
    pub async fn simulate_experiences(
        &self,
        params: &PipelineParams,
        agents: &[Agent],
        on_event: EventSink<'_>,
    ) -> Vec<Experience> {
        let total = agents.len();
        let completed = AtomicUsize::new(0);
        let completed = &completed;

        let run_one = |agent: &Agent| {
            let agent = agent.clone();
            async move {
                let experience = self.simulate_one(params, &agent, on_event).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                on_event(PipelineEvent::ExperienceReady {
                    experience: experience.clone(),
                    completed: done,
                    total,
                });
                experience
            }
        };

        let mut experiences = self.dispatch(agents, run_one).await;
        experiences.sort_by_key(|e| e.agent_id);
        experiences
    }

    /// Stage 3: interview every agent about their experience.
    ///
    /// `experiences` must be sorted by agent id and aligned with `agents`.
    pub async fn conduct_interviews(
        &self,
        params: &PipelineParams,
        agents: &[Agent],
        experiences: &[Experience],
        on_event: EventSink<'_>,
    ) -> Vec<Interview> {
        let total = agents.len();
        let completed = AtomicUsize::new(0);
        let completed = &completed;

        let run_one = |agent: &Agent| {
            let agent = agent.clone();
            let experience = experiences
                .iter()
                .find(|e| e.agent_id == agent.id)
                .cloned()
                .unwrap_or_else(|| Experience {
                    agent_id: agent.id,
                    steps: vec![],
                    raw: String::new(),
                });
            async move {
                let interview = self
                    .interview_one(params, &agent, &experience, on_event)
                    .await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                on_event(PipelineEvent::InterviewReady {
                    interview: interview.clone(),
                    completed: done,
                    total,
                });
                interview
            }
        };

        let mut interviews = self.dispatch(agents, run_one).await;
        interviews.sort_by_key(|i| i.agent_id);
        interviews
    }

    /// Stage 4: extract latent needs from every interview.
    ///
    /// Returns the flattened need list sorted by agent id.
    pub async fn extract_needs(
        &self,
        params: &PipelineParams,
        agents: &[Agent],
        interviews: &[Interview],
        on_event: EventSink<'_>,
    ) -> Vec<Need> {
        let total = agents.len();
        let completed = AtomicUsize::new(0);
        let completed = &completed;

        let run_one = |agent: &Agent| {
            let agent = agent.clone();
            let interview = interviews
                .iter()
                .find(|i| i.agent_id == agent.id)
                .cloned()
                .unwrap_or_else(|| Interview {
                    agent_id: agent.id,
                    exchanges: vec![],
                });
            async move {
                let needs = self.extract_one(params, &agent, &interview, on_event).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                on_event(PipelineEvent::NeedsReady {
                    needs: needs.clone(),
                    completed: done,
                    total,
                });
                (agent.id, needs)
            }
        };

        let mut per_agent = self.dispatch(agents, run_one).await;
        per_agent.sort_by_key(|(agent_id, _)| *agent_id);
        per_agent
            .into_iter()
            .flat_map(|(_, needs)| needs)
            .collect()
    }

    /// Run one per-agent future for every agent, honoring the execution
    /// mode. Parallel dispatch is capped by the semaphore.
    async fn dispatch<'a, T, F, Fut>(&'a self, agents: &'a [Agent], run_one: F) -> Vec<T>
    where
        F: Fn(&'a Agent) -> Fut,
        Fut: std::future::Future<Output = T> + 'a,
    {
        match self.mode {
            ExecutionMode::Sequential => {
                let mut out = Vec::with_capacity(agents.len());
                for agent in agents {
                    out.push(run_one(agent).await);
                }
                out
            }
            ExecutionMode::Parallel => {
                let futures = agents.iter().map(|agent| {
                    let fut = run_one(agent);
                    async move {
                        let _permit = self
                            .semaphore
                            .acquire()
                            .await
                            .expect("semaphore closed unexpectedly");
                        fut.await
                    }
                });
                join_all(futures).await
            }
        }
    }

    async fn simulate_one(
        &self,
        params: &PipelineParams,
        agent: &Agent,
        on_event: EventSink<'_>,
    ) -> Experience {
        let prompt =
            prompts::build_simulation_prompt(&params.product, &params.design_context, agent);

        match self
            .provider
            .generate(PipelineStage::SimulatingExperiences, &prompt)
            .await
        {
            Ok(text) => Experience {
                agent_id: agent.id,
                steps: self.parsers.parse_experience_steps(&text),
                raw: text,
            },
            Err(err) => {
                tracing::warn!(agent_id = agent.id, error = %err, "Experience simulation failed");
                on_event(PipelineEvent::AgentDegraded {
                    stage: PipelineStage::SimulatingExperiences,
                    agent_id: agent.id,
                    reason: format!("experience simulation failed for {}: {}", agent.name, err),
                });
                Experience {
                    agent_id: agent.id,
                    steps: vec![],
                    raw: String::new(),
                }
            }
        }
    }

    async fn interview_one(
        &self,
        params: &PipelineParams,
        agent: &Agent,
        experience: &Experience,
        on_event: EventSink<'_>,
    ) -> Interview {
        let prompt =
            prompts::build_interview_prompt(&params.product, agent, experience, &params.questions);

        match self
            .provider
            .generate(PipelineStage::ConductingInterviews, &prompt)
            .await
        {
            Ok(text) => self.parsers.parse_interview(agent.id, &params.questions, &text),
            Err(err) => {
                tracing::warn!(agent_id = agent.id, error = %err, "Interview failed");
                on_event(PipelineEvent::AgentDegraded {
                    stage: PipelineStage::ConductingInterviews,
                    agent_id: agent.id,
                    reason: format!("interview failed for {}: {}", agent.name, err),
                });
                Interview {
                    agent_id: agent.id,
                    exchanges: vec![],
                }
            }
        }
    }

    async fn extract_one(
        &self,
        params: &PipelineParams,
        agent: &Agent,
        interview: &Interview,
        on_event: EventSink<'_>,
    ) -> Vec<Need> {
        let prompt = prompts::build_extraction_prompt(&params.product, agent, interview);

        let text = match self
            .provider
            .generate(PipelineStage::ExtractingNeeds, &prompt)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(agent_id = agent.id, error = %err, "Need extraction failed");
                on_event(PipelineEvent::AgentDegraded {
                    stage: PipelineStage::ExtractingNeeds,
                    agent_id: agent.id,
                    reason: format!("need extraction failed for {}: {}", agent.name, err),
                });
                return vec![];
            }
        };

        let json = extract_json_from_response(&text);
        let payload: NeedsPayload = match serde_json::from_str(&json) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(agent_id = agent.id, error = %err, "Unparseable needs response");
                on_event(PipelineEvent::AgentDegraded {
                    stage: PipelineStage::ExtractingNeeds,
                    agent_id: agent.id,
                    reason: format!("unparseable needs response for {}: {}", agent.name, err),
                });
                return vec![];
            }
        };

        let mut needs = Vec::with_capacity(payload.needs.len());
        for raw in payload.needs {
            // Unknown categories are dropped; the taxonomy is closed.
            let category = match NeedCategory::from_str(&raw.category) {
                Ok(category) => category,
                Err(reason) => {
                    on_event(PipelineEvent::AgentDegraded {
                        stage: PipelineStage::ExtractingNeeds,
                        agent_id: agent.id,
                        reason: format!("need skipped: {}", reason),
                    });
                    continue;
                }
            };
            let priority = NeedPriority::from_str(&raw.priority).unwrap_or(NeedPriority::Medium);

            needs.push(Need {
                category,
                statement: raw.need_statement,
                evidence: raw.evidence,
                priority,
                design_implication: raw.design_implication,
                agent_id: Some(agent.id),
            });
        }

        needs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_full_markdown() {
        let parsers = ResponseParsers::new();
        let text = "**Name**: Maya Chen\n**Age**: 34\n**Gender**: Female\n\
                    **Description**: An urban cyclist.\n**Rationale**: Commuter view.\n";

        let agent = parsers.parse_agent(0, text);

        assert_eq!(agent.id, 0);
        assert_eq!(agent.name, "Maya Chen");
        assert_eq!(agent.age, Some(34));
        assert_eq!(agent.gender.as_deref(), Some("Female"));
        assert_eq!(agent.description, "An urban cyclist.");
        assert_eq!(agent.rationale, "Commuter view.");
    }

    #[test]
    fn test_parse_agent_missing_fields() {
        let parsers = ResponseParsers::new();
        let text = "A persona without any markdown structure.";

        let agent = parsers.parse_agent(2, text);

        assert_eq!(agent.name, "Agent 3");
        assert_eq!(agent.age, None);
        assert_eq!(agent.gender, None);
        assert_eq!(agent.description, text);
    }

    #[test]
    fn test_parse_experience_steps() {
        let parsers = ResponseParsers::new();
        let text = "Step 1:\nAction: Opened the app.\nObservation: Slow load.\nChallenge: None.\n\n\
                    Step 2:\nAction: Paired the device.\nObservation: Worked.\nChallenge: Unclear prompt.\n";

        let steps = parsers.parse_experience_steps(text);

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action, "Opened the app.");
        assert_eq!(steps[1].challenge, "Unclear prompt.");
    }

    #[test]
    fn test_parse_experience_steps_unstructured() {
        let parsers = ResponseParsers::new();
        let steps = parsers.parse_experience_steps("A free-form narrative with no steps.");
        assert!(steps.is_empty());
    }

    #[test]
    fn test_parse_interview_aligns_answers() {
        let parsers = ResponseParsers::new();
        let questions = vec![
            "What frustrated you?".to_string(),
            "What would you change?".to_string(),
            "Would you recommend it?".to_string(),
        ];
        let text = "A1: The pairing flow.\nA2: The mode indicator.\n";

        let interview = parsers.parse_interview(1, &questions, text);

        assert_eq!(interview.agent_id, 1);
        assert_eq!(interview.exchanges.len(), 3);
        assert_eq!(interview.exchanges[0].answer, "The pairing flow.");
        assert_eq!(interview.exchanges[1].answer, "The mode indicator.");
        // Question 3 got no answer
        assert_eq!(interview.exchanges[2].answer, "");
    }
}
