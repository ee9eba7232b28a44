//! Command-line interface for elicit-forge.
//!
//! Provides the `analyze` and `repro` commands and the poll loop that
//! drives them against the service facade.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
