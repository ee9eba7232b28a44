//! CLI command definitions for elicit-forge.
//!
//! Two commands: `analyze` runs one latent-need analysis end to end, and
//! `repro` runs the reproducibility harness. Both submit a job to the
//! service facade and poll it the same way an HTTP client would.

use crate::config::{PipelineConfig, ReproConfig, DEFAULT_AGENTS};
use crate::llm::{MockTextGenerator, OpenRouterProvider, TextGenerator};
use crate::pipeline::ExecutionMode;
use crate::service::{AnalysisRequest, ElicitService, ReproRequest};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default model to use for generation.
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Default output directory for exported results.
const DEFAULT_OUTPUT_DIR: &str = "./results";

/// How often the poll loop re-reads job state.
const POLL_INTERVAL_MS: u64 = 300;

/// Latent-need elicitation through simulated user interviews.
#[derive(Parser)]
#[command(name = "elicit-forge")]
#[command(about = "Elicit latent user needs from LLM-simulated personas")]
#[command(version)]
#[command(
    long_about = "elicit-forge runs a four-stage pipeline (personas, experiences, interviews, need extraction) against a product description, and can repeat the run to score reproducibility.\n\nExample usage:\n  elicit-forge analyze --product \"smart kettle\" --context \"shared office kitchen\" --agents 3"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one analysis: personas, experiences, interviews, extracted needs.
    #[command(alias = "run")]
    Analyze(AnalyzeArgs),

    /// Run the same analysis N times and score cross-run consistency.
    Repro(ReproArgs),
}

/// Arguments shared by both commands for building the provider and pipeline.
#[derive(Parser, Debug)]
pub struct CommonArgs {
    /// Product or concept to analyze.
    #[arg(short, long)]
    pub product: String,

    /// Design context the product lives in (environment, constraints, users).
    #[arg(short = 'c', long, default_value = "")]
    pub context: String,

    /// Number of simulated user personas.
    #[arg(short = 'n', long, default_value_t = DEFAULT_AGENTS)]
    pub agents: usize,

    /// Stage execution mode for stages 2-4 (sequential, parallel).
    #[arg(long, default_value = "parallel")]
    pub mode: ExecutionMode,

    /// LLM model to use.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY env var).
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// LLM provider backend (openrouter, mock).
    #[arg(long, default_value = "openrouter")]
    pub provider: String,

    /// YAML file overriding the interview question set.
    #[arg(short = 'q', long)]
    pub questions: Option<String>,

    /// Output directory for exported JSON.
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: String,
}

/// Arguments for `elicit-forge analyze`.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Arguments for `elicit-forge repro`.
#[derive(Parser, Debug)]
pub struct ReproArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of sequential pipeline iterations.
    #[arg(short = 'i', long, default_value = "3")]
    pub iterations: usize,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Analyze(args) => {
            run_analyze_command(args).await?;
        }
        Commands::Repro(args) => {
            run_repro_command(args).await?;
        }
    }
    Ok(())
}

fn build_provider(args: &CommonArgs) -> anyhow::Result<Arc<dyn TextGenerator>> {
    match args.provider.as_str() {
        "mock" => {
            info!("Using deterministic offline provider");
            return Ok(Arc::new(MockTextGenerator::new(args.agents)));
        }
        "openrouter" => {}
        other => {
            return Err(anyhow::anyhow!(
                "Unknown provider '{}' (expected 'openrouter' or 'mock')",
                other
            ));
        }
    }

    let api_key = args
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No API key provided. Set OPENROUTER_API_KEY or pass --api-key, or use --provider mock."
            )
        })?;

    let provider = OpenRouterProvider::with_model(api_key, args.model.clone());
    info!(model = %provider.model(), api_key = %provider.api_key_masked(), "Using OpenRouter provider");
    Ok(Arc::new(provider))
}

fn build_config(args: &CommonArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::default();
    if let Some(path) = &args.questions {
        config = config.with_questions_file(Path::new(path))?;
    }
    config.validate()?;
    Ok(config)
}

async fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let common = args.common;
    let provider = build_provider(&common)?;
    let config = build_config(&common)?;
    let service = ElicitService::new(provider, config);

    let id = service
        .submit_analysis(AnalysisRequest {
            product: common.product.clone(),
            design_context: common.context.clone(),
            n_agents: Some(common.agents),
            mode: common.mode,
        })
        .await?;

    let mut last_message = String::new();
    loop {
        let status = service.analysis_status(id).await?;
        if status.progress.message != last_message {
            info!(
                stage = status.progress.stage_number,
                total = status.progress.total_stages,
                "{}",
                status.progress.message
            );
            last_message = status.progress.message.clone();
        }
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }

    let results = service.analysis_results(id).await?;
    for warning in &results.warnings {
        warn!("{}", warning);
    }
    let result = match results.result {
        Some(result) => result,
        None => {
            let reason = results
                .error
                .unwrap_or_else(|| "analysis failed".to_string());
            return Err(anyhow::anyhow!(reason));
        }
    };

    let summary = result.summary();
    info!(
        agents = summary.agents,
        qa_pairs = summary.qa_pairs,
        needs = summary.total_needs,
        duration_secs = %format!("{:.2}", summary.duration_secs),
        "Analysis complete"
    );
    for (category, count) in &result.aggregated.by_category {
        info!("  {}: {} needs", category, count);
    }

    let output_dir = Path::new(&common.output);
    std::fs::create_dir_all(output_dir)?;
    let path = result.export_json(output_dir)?;
    info!(path = %path.display(), "Results exported");
    Ok(())
}

async fn run_repro_command(args: ReproArgs) -> anyhow::Result<()> {
    let common = args.common;
    let provider = build_provider(&common)?;
    let config = build_config(&common)?;
    let service = ElicitService::new(provider, config).with_repro_config(ReproConfig::default());

    let id = service
        .start_reproducibility(ReproRequest {
            product: common.product.clone(),
            design_context: common.context.clone(),
            n_agents: Some(common.agents),
            n_iterations: args.iterations,
            mode: common.mode,
        })
        .await?;

    let mut last_message = String::new();
    loop {
        let status = service.reproducibility_status(id).await?;
        if status.progress.message != last_message {
            match status.progress.eta_secs {
                Some(eta) => {
                    info!(eta_secs = %format!("{:.1}", eta), "{}", status.progress.message)
                }
                None => info!("{}", status.progress.message),
            }
            last_message = status.progress.message.clone();
        }
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }

    let report = service.reproducibility_results(id).await?;
    let metrics = &report.metrics;
    info!(
        iterations = report.metadata.total_iterations,
        successful = report.metadata.successful_iterations,
        "Reproducibility batch complete"
    );
    info!("  Agent consistency:      {:.3}", metrics.agent.score);
    info!("  Category consistency:   {:.3}", metrics.category.score);
    info!("  Priority consistency:   {:.3}", metrics.priority.score);
    info!("  Statement consistency:  {:.3}", metrics.statement.score);
    info!("  Interview consistency:  {:.3}", metrics.interview.score);
    info!(
        "  Composite: {:.3} ({})",
        metrics.composite, metrics.rating
    );

    let output_dir = Path::new(&common.output);
    std::fs::create_dir_all(output_dir)?;
    let filename = format!(
        "repro_report_{}.json",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    );
    let path = output_dir.join(filename);
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    info!(path = %path.display(), "Report exported");
    Ok(())
}
