//! elicit-forge: Latent-need elicitation through LLM-simulated user
//! interviews.
//!
//! This library runs a four-stage pipeline (persona generation, experience
//! simulation, interviews, need extraction) as pollable asynchronous jobs,
//! and a reproducibility harness that repeats the pipeline and scores
//! cross-run consistency.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod repro;
pub mod service;
pub mod utils;

// Re-export commonly used error types
pub use error::{ConfigError, JobError, LlmError, MetricsError, ServiceError, StoreError};
