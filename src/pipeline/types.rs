//! Domain types for the elicitation pipeline.
//!
//! The pipeline turns a product description into personas, simulated
//! experiences, interviews and finally extracted latent needs. Everything
//! here is plain serde-derived data; behavior lives in the stage executor
//! and runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Number of stages in one pipeline run.
pub const TOTAL_STAGES: u32 = 4;

/// The four stages of an elicitation run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    GeneratingAgents,
    SimulatingExperiences,
    ConductingInterviews,
    ExtractingNeeds,
}

impl PipelineStage {
    /// 1-based stage number for progress reporting.
    pub fn number(&self) -> u32 {
        match self {
            PipelineStage::GeneratingAgents => 1,
            PipelineStage::SimulatingExperiences => 2,
            PipelineStage::ConductingInterviews => 3,
            PipelineStage::ExtractingNeeds => 4,
        }
    }

    /// Human-readable stage label.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::GeneratingAgents => "Generating agents",
            PipelineStage::SimulatingExperiences => "Simulating experiences",
            PipelineStage::ConductingInterviews => "Conducting interviews",
            PipelineStage::ExtractingNeeds => "Extracting needs",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// How stages 2-4 dispatch per-agent work. Stage 1 is always sequential
/// because each persona prompt embeds the personas generated before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    #[default]
    Parallel,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            other => Err(format!(
                "unknown execution mode '{}' (expected 'sequential' or 'parallel')",
                other
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// A generated user persona. Created in stage 1, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// 0-based ordinal, stable across the run.
    pub id: usize,
    pub name: String,
    /// Parsed from the generated markdown; absent fields stay None.
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub description: String,
    pub rationale: String,
}

/// One step of a simulated product experience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceStep {
    pub action: String,
    pub observation: String,
    pub challenge: String,
}

/// A simulated first-person experience for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub agent_id: usize,
    /// Best-effort structured steps; may be empty if parsing found none.
    pub steps: Vec<ExperienceStep>,
    /// Full narrative as generated; always preserved.
    pub raw: String,
}

/// One question/answer exchange from an interview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// An interview transcript for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interview {
    pub agent_id: usize,
    pub exchanges: Vec<QaPair>,
}

/// Fixed taxonomy of latent need categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum NeedCategory {
    Functional,
    Usability,
    Performance,
    Safety,
    Emotional,
    Social,
    Accessibility,
}

impl NeedCategory {
    /// All categories in declaration order.
    pub const ALL: [NeedCategory; 7] = [
        NeedCategory::Functional,
        NeedCategory::Usability,
        NeedCategory::Performance,
        NeedCategory::Safety,
        NeedCategory::Emotional,
        NeedCategory::Social,
        NeedCategory::Accessibility,
    ];
}

impl FromStr for NeedCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "functional" => Ok(NeedCategory::Functional),
            "usability" => Ok(NeedCategory::Usability),
            "performance" => Ok(NeedCategory::Performance),
            "safety" => Ok(NeedCategory::Safety),
            "emotional" => Ok(NeedCategory::Emotional),
            "social" => Ok(NeedCategory::Social),
            "accessibility" => Ok(NeedCategory::Accessibility),
            other => Err(format!("unknown need category '{}'", other)),
        }
    }
}

impl fmt::Display for NeedCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NeedCategory::Functional => "Functional",
            NeedCategory::Usability => "Usability",
            NeedCategory::Performance => "Performance",
            NeedCategory::Safety => "Safety",
            NeedCategory::Emotional => "Emotional",
            NeedCategory::Social => "Social",
            NeedCategory::Accessibility => "Accessibility",
        };
        write!(f, "{}", label)
    }
}

/// Priority of an extracted need.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum NeedPriority {
    High,
    Medium,
    Low,
}

impl FromStr for NeedPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(NeedPriority::High),
            "medium" => Ok(NeedPriority::Medium),
            "low" => Ok(NeedPriority::Low),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

impl fmt::Display for NeedPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NeedPriority::High => "High",
            NeedPriority::Medium => "Medium",
            NeedPriority::Low => "Low",
        };
        write!(f, "{}", label)
    }
}

/// A latent user need extracted from one interview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Need {
    pub category: NeedCategory,
    pub statement: String,
    pub evidence: String,
    pub priority: NeedPriority,
    pub design_implication: String,
    /// The agent whose interview produced this need.
    pub agent_id: Option<usize>,
}

/// The full set of extracted needs with category and priority rollups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedNeeds {
    pub total_needs: usize,
    pub by_category: BTreeMap<NeedCategory, usize>,
    pub by_priority: BTreeMap<NeedPriority, usize>,
    pub needs: Vec<Need>,
}

/// Aggregate a flat need list into rollup counts.
///
/// Invariant: `total_needs == needs.len()` and both rollups sum to it.
pub fn aggregate_needs(needs: &[Need]) -> AggregatedNeeds {
    let mut by_category: BTreeMap<NeedCategory, usize> = BTreeMap::new();
    let mut by_priority: BTreeMap<NeedPriority, usize> = BTreeMap::new();

    for need in needs {
        *by_category.entry(need.category).or_insert(0) += 1;
        *by_priority.entry(need.priority).or_insert(0) += 1;
    }

    AggregatedNeeds {
        total_needs: needs.len(),
        by_category,
        by_priority,
        needs: needs.to_vec(),
    }
}

/// Input parameters for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineParams {
    /// What is being designed (e.g., "smart bike lock").
    pub product: String,
    /// Design context or constraints.
    pub design_context: String,
    /// Number of personas to generate.
    pub n_agents: usize,
    pub mode: ExecutionMode,
    /// Interview questions asked of every agent.
    pub questions: Vec<String>,
}

/// Counts summarizing one completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub agents: usize,
    pub experiences: usize,
    pub interviews: usize,
    pub qa_pairs: usize,
    pub total_needs: usize,
    pub duration_secs: f64,
}

/// Complete output of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub product: String,
    pub design_context: String,
    /// Requested agent count. `agents.len()` can be smaller when persona
    /// slots were skipped after generation failures (see `warnings`).
    pub n_agents: usize,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Wall time per stage, keyed by stage label.
    pub stage_durations: BTreeMap<String, f64>,
    pub agents: Vec<Agent>,
    pub experiences: Vec<Experience>,
    pub interviews: Vec<Interview>,
    pub aggregated: AggregatedNeeds,
    /// Degraded agents and skipped needs, in occurrence order.
    pub warnings: Vec<String>,
}

impl PipelineResult {
    /// Summarize the run for logs and CLI output.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            agents: self.agents.len(),
            experiences: self.experiences.len(),
            interviews: self.interviews.len(),
            qa_pairs: self.interviews.iter().map(|i| i.exchanges.len()).sum(),
            total_needs: self.aggregated.total_needs,
            duration_secs: self.duration_secs,
        }
    }

    /// Write the full result as pretty JSON under `dir`, returning the path.
    ///
    /// File name: `pipeline_results_<utc timestamp>.json`.
    pub fn export_json(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let filename = format!(
            "pipeline_results_{}.json",
            self.finished_at.format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(filename);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn need(category: NeedCategory, priority: NeedPriority) -> Need {
        Need {
            category,
            statement: "statement".to_string(),
            evidence: "evidence".to_string(),
            priority,
            design_implication: "implication".to_string(),
            agent_id: Some(0),
        }
    }

    #[test]
    fn test_stage_numbers_are_ordered() {
        assert_eq!(PipelineStage::GeneratingAgents.number(), 1);
        assert_eq!(PipelineStage::ExtractingNeeds.number(), TOTAL_STAGES);
    }

    #[test]
    fn test_execution_mode_from_str() {
        assert_eq!(
            "Parallel".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::Parallel
        );
        assert_eq!(
            "sequential".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::Sequential
        );
        assert!("threaded".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_need_category_from_str_case_insensitive() {
        assert_eq!(
            "usability".parse::<NeedCategory>().unwrap(),
            NeedCategory::Usability
        );
        assert_eq!(
            " SAFETY ".parse::<NeedCategory>().unwrap(),
            NeedCategory::Safety
        );
        assert!("ergonomic".parse::<NeedCategory>().is_err());
    }

    #[test]
    fn test_need_priority_from_str() {
        assert_eq!("High".parse::<NeedPriority>().unwrap(), NeedPriority::High);
        assert!("urgent".parse::<NeedPriority>().is_err());
    }

    #[test]
    fn test_aggregate_needs_counts() {
        let needs = vec![
            need(NeedCategory::Usability, NeedPriority::High),
            need(NeedCategory::Usability, NeedPriority::Medium),
            need(NeedCategory::Safety, NeedPriority::High),
        ];

        let aggregated = aggregate_needs(&needs);

        assert_eq!(aggregated.total_needs, 3);
        assert_eq!(aggregated.needs.len(), 3);
        assert_eq!(aggregated.by_category[&NeedCategory::Usability], 2);
        assert_eq!(aggregated.by_category[&NeedCategory::Safety], 1);
        assert_eq!(aggregated.by_priority[&NeedPriority::High], 2);
        assert_eq!(
            aggregated.by_category.values().sum::<usize>(),
            aggregated.total_needs
        );
        assert_eq!(
            aggregated.by_priority.values().sum::<usize>(),
            aggregated.total_needs
        );
    }

    #[test]
    fn test_aggregate_needs_empty() {
        let aggregated = aggregate_needs(&[]);
        assert_eq!(aggregated.total_needs, 0);
        assert!(aggregated.by_category.is_empty());
        assert!(aggregated.needs.is_empty());
    }

    #[test]
    fn test_category_serializes_as_string_key() {
        let mut map = BTreeMap::new();
        map.insert(NeedCategory::Usability, 2usize);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, "{\"Usability\":2}");
    }
}
