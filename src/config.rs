//! Pipeline and reproducibility configuration.
//!
//! Interview questions can be loaded from a YAML file (a `questions:` list)
//! and fall back to compiled-in defaults when no file is given.

use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

/// Default interview questions asked of every persona.
pub const DEFAULT_QUESTIONS: [&str; 3] = [
    "What frustrated you most during your experience?",
    "If you could change one thing about the product, what would it be?",
    "Would you recommend this product to someone like you? Why or why not?",
];

/// Default number of personas per run.
pub const DEFAULT_AGENTS: usize = 3;

/// Runtime settings for the elicitation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on personas per run.
    pub max_agents: usize,
    /// Concurrent provider calls allowed in parallel stages.
    pub max_concurrent_calls: usize,
    /// Interview questions asked of every agent.
    pub interview_questions: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_agents: 10,
            max_concurrent_calls: 3,
            interview_questions: DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect(),
        }
    }
}

impl PipelineConfig {
    /// Validate configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_agents == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_agents".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_calls".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.interview_questions.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "interview_questions".to_string(),
                message: "at least one interview question is required".to_string(),
            });
        }
        Ok(())
    }

    /// Replace the interview questions with the ones from a YAML file.
    pub fn with_questions_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        self.interview_questions = load_questions(path)?;
        Ok(self)
    }
}

/// Wire shape of the questions YAML file.
#[derive(Debug, Deserialize)]
struct QuestionsFile {
    questions: Vec<String>,
}

/// Load interview questions from a YAML file of the form
/// `questions: [ ... ]`.
pub fn load_questions(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let parsed: QuestionsFile = serde_yaml::from_str(&content)?;
    if parsed.questions.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "questions".to_string(),
            message: format!("no questions found in {}", path.display()),
        });
    }
    Ok(parsed.questions)
}

/// Settings for the reproducibility harness.
#[derive(Debug, Clone)]
pub struct ReproConfig {
    /// Upper bound on iterations per reproducibility job.
    pub max_iterations: usize,
}

impl Default for ReproConfig {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}
