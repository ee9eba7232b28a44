//! Text generation client types and the provider port.
//!
//! The pipeline talks to language models exclusively through the
//! [`TextGenerator`] trait. Providers translate a stage-tagged prompt into
//! whatever wire format their backend expects; retry policy lives inside the
//! provider, never in the orchestration above it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::pipeline::PipelineStage;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

}

/// Trait for providers that can generate text for a pipeline stage.
///
/// The `stage` argument lets a provider pick per-stage sampling settings
/// (persona generation wants higher temperature than need extraction) and
/// lets test doubles script stage-specific responses.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a response for the given stage and prompt.
    async fn generate(&self, stage: PipelineStage, prompt: &str) -> Result<String, LlmError>;
}
