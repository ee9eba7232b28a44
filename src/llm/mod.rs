//! Text generation layer: the provider port, the OpenRouter-backed
//! implementation, and a deterministic mock for tests and offline runs.

pub mod client;
pub mod mock;
pub mod providers;

pub use client::{Message, TextGenerator};
pub use mock::MockTextGenerator;
pub use providers::OpenRouterProvider;
