//! Provider implementations for the text generation port.

pub mod openrouter;

pub use openrouter::OpenRouterProvider;
