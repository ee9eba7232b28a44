//! Error types for elicit-forge operations.
//!
//! Defines error types for all major subsystems:
//! - Text generation provider interactions
//! - Job store lookups
//! - Pipeline and job execution
//! - Reproducibility metrics
//! - Configuration loading and validation

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when talking to a text generation provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENROUTER_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse provider response: {0}")]
    ParseError(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Returns whether this error is transient and worth retrying.
    ///
    /// Network failures, rate limits and server-side (5xx) errors are
    /// transient; everything else fails fast.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(msg) => {
                msg.contains("timeout")
                    || msg.contains("connection")
                    || msg.contains("temporarily")
                    || msg.contains("Connection refused")
            }
            LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

/// Errors that can occur during job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested job identifier is unknown. This is a normal,
    /// expected condition (bad or expired id), distinct from "queued".
    #[error("Job {0} not found")]
    NotFound(Uuid),
}

/// Errors that abort an entire pipeline run.
///
/// Per-agent provider failures are *not* represented here: the stage
/// executor absorbs them into a degraded record plus a job warning.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("At least one agent is required, got {0}")]
    NoAgents(usize),

    #[error("Pipeline stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },
}

/// Errors from the consistency metrics engine.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// No successful runs were available to compare.
    #[error("Insufficient data: no successful runs to compute consistency metrics from")]
    InsufficientData,

    #[error("Invalid metric weights: {0}")]
    InvalidWeights(String),
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors surfaced by the service facade to integrators.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unknown job identifier: the 404-equivalent, never an empty success.
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job is not completed yet (status: {status})")]
    NotCompleted { status: String },

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
        }
    }
}
