//! Cross-run consistency metrics.
//!
//! Pure and deterministic: given the successful runs of a reproducibility
//! batch, compute five component scores, a weighted composite and a
//! qualitative rating. Every score is clamped into [0, 1] and degenerate
//! inputs (zero needs everywhere, missing ages) produce defined values,
//! never NaN.
//!
//! A single run is perfectly self-consistent: every pairwise statistic is
//! defined over zero pairs and reads 1.0.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use crate::error::MetricsError;
use crate::pipeline::{NeedCategory, NeedPriority, PipelineResult};

/// Age spread is normalized against this many years.
const AGE_NORMALIZATION: f64 = 50.0;

/// Answer-length spread is normalized against this many characters.
const ANSWER_LENGTH_NORMALIZATION: f64 = 500.0;

/// Component weights for the composite score. Must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricWeights {
    pub agent: f64,
    pub category: f64,
    pub priority: f64,
    pub statement: f64,
    pub interview: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            agent: 0.15,
            category: 0.25,
            priority: 0.20,
            statement: 0.25,
            interview: 0.15,
        }
    }
}

impl MetricWeights {
    /// Check that the weights are non-negative and sum to 1.
    pub fn validate(&self) -> Result<(), MetricsError> {
        let all = [
            self.agent,
            self.category,
            self.priority,
            self.statement,
            self.interview,
        ];
        if all.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(MetricsError::InvalidWeights(
                "weights must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = all.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(MetricsError::InvalidWeights(format!(
                "weights must sum to 1.0, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// Qualitative rating derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyRating {
    Excellent,
    Good,
    Moderate,
    Low,
}

impl fmt::Display for ConsistencyRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConsistencyRating::Excellent => "Excellent",
            ConsistencyRating::Good => "Good",
            ConsistencyRating::Moderate => "Moderate",
            ConsistencyRating::Low => "Low",
        };
        write!(f, "{}", label)
    }
}

/// Composite-score cutoffs for each rating, checked top down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingThresholds {
    pub excellent: f64,
    pub good: f64,
    pub moderate: f64,
}

impl Default for RatingThresholds {
    fn default() -> Self {
        Self {
            excellent: 0.85,
            good: 0.70,
            moderate: 0.50,
        }
    }
}

impl RatingThresholds {
    pub fn rate(&self, composite: f64) -> ConsistencyRating {
        if composite >= self.excellent {
            ConsistencyRating::Excellent
        } else if composite >= self.good {
            ConsistencyRating::Good
        } else if composite >= self.moderate {
            ConsistencyRating::Moderate
        } else {
            ConsistencyRating::Low
        }
    }
}

/// How stable the generated personas are across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConsistency {
    pub score: f64,
    /// 1 - sigma(mean age per run) / 50; None when no run had parsed ages.
    pub age_stability: Option<f64>,
    /// Mean pairwise cosine similarity of gender-label distributions.
    pub gender_similarity: Option<f64>,
    /// Fallback signal: 1 - coefficient of variation of agent counts.
    pub count_stability: f64,
    pub agent_counts: Vec<usize>,
}

/// How stable the need categories are across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConsistency {
    pub score: f64,
    /// Mean pairwise Jaccard over per-run category sets.
    pub set_overlap: f64,
    /// Mean pairwise cosine over per-category frequency vectors.
    pub distribution_similarity: f64,
    /// Fraction of runs in which each category appeared.
    pub category_presence: BTreeMap<NeedCategory, f64>,
}

/// How stable the priority mix is across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConsistency {
    pub score: f64,
    pub mean_high_fraction: f64,
    pub mean_medium_fraction: f64,
    pub mean_low_fraction: f64,
    pub high_fraction_stddev: f64,
}

/// How similar the need statements are across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementConsistency {
    pub score: f64,
    /// Mean pairwise Jaccard over normalized keyword sets.
    pub keyword_overlap: f64,
    /// 1 - coefficient of variation of needs-per-run counts.
    pub count_stability: f64,
    pub mean_needs_per_run: f64,
}

/// How stable interview answer lengths are across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewConsistency {
    pub score: f64,
    pub mean_answer_lengths: Vec<f64>,
}

/// Full consistency report over the successful runs of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub agent: AgentConsistency,
    pub category: CategoryConsistency,
    pub priority: PriorityConsistency,
    pub statement: StatementConsistency,
    pub interview: InterviewConsistency,
    pub composite: f64,
    pub rating: ConsistencyRating,
    pub sample_size: usize,
}

/// Compute consistency metrics with the pinned default weights and
/// thresholds.
pub fn compute_metrics(runs: &[PipelineResult]) -> Result<ConsistencyReport, MetricsError> {
    compute_metrics_with(runs, &MetricWeights::default(), &RatingThresholds::default())
}

/// Compute consistency metrics with explicit weights and thresholds.
pub fn compute_metrics_with(
    runs: &[PipelineResult],
    weights: &MetricWeights,
    thresholds: &RatingThresholds,
) -> Result<ConsistencyReport, MetricsError> {
    weights.validate()?;
    if runs.is_empty() {
        return Err(MetricsError::InsufficientData);
    }

    let agent = agent_consistency(runs);
    let category = category_consistency(runs);
    let priority = priority_consistency(runs);
    let statement = statement_consistency(runs);
    let interview = interview_consistency(runs);

    let composite = clamp01(
        weights.agent * agent.score
            + weights.category * category.score
            + weights.priority * priority.score
            + weights.statement * statement.score
            + weights.interview * interview.score,
    );
    // A weighted sum of exact-1.0 components can land one ulp under 1.0.
    let composite = if (composite - 1.0).abs() < 1e-12 {
        1.0
    } else {
        composite
    };
    let rating = thresholds.rate(composite);

    Ok(ConsistencyReport {
        agent,
        category,
        priority,
        statement,
        interview,
        composite,
        rating,
        sample_size: runs.len(),
    })
}

fn agent_consistency(runs: &[PipelineResult]) -> AgentConsistency {
    let agent_counts: Vec<usize> = runs.iter().map(|r| r.agents.len()).collect();
    let counts_f64: Vec<f64> = agent_counts.iter().map(|c| *c as f64).collect();
    let count_stability = clamp01(1.0 - coefficient_of_variation(&counts_f64));

    let mean_ages: Vec<f64> = runs
        .iter()
        .filter_map(|run| {
            let ages: Vec<f64> = run
                .agents
                .iter()
                .filter_map(|a| a.age)
                .map(f64::from)
                .collect();
            if ages.is_empty() {
                None
            } else {
                Some(mean(&ages))
            }
        })
        .collect();
    let age_stability = if mean_ages.is_empty() {
        None
    } else {
        Some(clamp01(1.0 - std_dev(&mean_ages) / AGE_NORMALIZATION))
    };

    let labels: BTreeSet<String> = runs
        .iter()
        .flat_map(|run| run.agents.iter())
        .filter_map(|a| a.gender.as_ref())
        .map(|g| g.trim().to_ascii_lowercase())
        .collect();
    let gender_similarity = if labels.is_empty() {
        None
    } else {
        let vectors: Vec<Vec<f64>> = runs
            .iter()
            .map(|run| {
                labels
                    .iter()
                    .map(|label| {
                        run.agents
                            .iter()
                            .filter(|a| {
                                a.gender
                                    .as_ref()
                                    .map(|g| g.trim().to_ascii_lowercase() == *label)
                                    .unwrap_or(false)
                            })
                            .count() as f64
                    })
                    .collect()
            })
            .collect();
        Some(clamp01(mean_pairwise(&vectors, |a, b| cosine(a, b))))
    };

    let score = match (age_stability, gender_similarity) {
        (Some(age), Some(gender)) => clamp01((age + gender) / 2.0),
        (Some(age), None) => age,
        (None, Some(gender)) => gender,
        (None, None) => count_stability,
    };

    AgentConsistency {
        score,
        age_stability,
        gender_similarity,
        count_stability,
        agent_counts,
    }
}

fn category_consistency(runs: &[PipelineResult]) -> CategoryConsistency {
    let sets: Vec<BTreeSet<NeedCategory>> = runs
        .iter()
        .map(|run| {
            run.aggregated
                .needs
                .iter()
                .map(|need| need.category)
                .collect()
        })
        .collect();
    let set_overlap = clamp01(mean_pairwise(&sets, |a, b| jaccard(a, b)));

    let vectors: Vec<Vec<f64>> = runs
        .iter()
        .map(|run| {
            NeedCategory::ALL
                .iter()
                .map(|category| {
                    run.aggregated
                        .by_category
                        .get(category)
                        .copied()
                        .unwrap_or(0) as f64
                })
                .collect()
        })
        .collect();
    let distribution_similarity = clamp01(mean_pairwise(&vectors, |a, b| cosine(a, b)));

    let mut category_presence = BTreeMap::new();
    for category in NeedCategory::ALL {
        let present = sets.iter().filter(|set| set.contains(&category)).count();
        if present > 0 {
            category_presence.insert(category, present as f64 / runs.len() as f64);
        }
    }

    CategoryConsistency {
        score: clamp01((set_overlap + distribution_similarity) / 2.0),
        set_overlap,
        distribution_similarity,
        category_presence,
    }
}

fn priority_consistency(runs: &[PipelineResult]) -> PriorityConsistency {
    let fractions: Vec<Vec<f64>> = runs
        .iter()
        .map(|run| {
            let total = run.aggregated.total_needs as f64;
            if total == 0.0 {
                return vec![0.0, 0.0, 0.0];
            }
            [NeedPriority::High, NeedPriority::Medium, NeedPriority::Low]
                .iter()
                .map(|priority| {
                    run.aggregated.by_priority.get(priority).copied().unwrap_or(0) as f64 / total
                })
                .collect()
        })
        .collect();

    let score = clamp01(mean_pairwise(&fractions, |a, b| cosine(a, b)));
    let high: Vec<f64> = fractions.iter().map(|f| f[0]).collect();
    let medium: Vec<f64> = fractions.iter().map(|f| f[1]).collect();
    let low: Vec<f64> = fractions.iter().map(|f| f[2]).collect();

    PriorityConsistency {
        score,
        mean_high_fraction: mean(&high),
        mean_medium_fraction: mean(&medium),
        mean_low_fraction: mean(&low),
        high_fraction_stddev: std_dev(&high),
    }
}

/// Keyword tokenizer for need statements: ASCII alphabetic runs of four
/// or more characters, compiled once.
fn keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z]{4,}").expect("invalid token pattern"))
}

fn statement_consistency(runs: &[PipelineResult]) -> StatementConsistency {
    let token_pattern = keyword_pattern();

    let keyword_sets: Vec<BTreeSet<String>> = runs
        .iter()
        .map(|run| {
            run.aggregated
                .needs
                .iter()
                .flat_map(|need| {
                    token_pattern
                        .find_iter(&need.statement)
                        .map(|m| m.as_str().to_ascii_lowercase())
                        .collect::<Vec<_>>()
                })
                .collect()
        })
        .collect();
    let keyword_overlap = clamp01(mean_pairwise(&keyword_sets, |a, b| jaccard(a, b)));

    let counts: Vec<f64> = runs
        .iter()
        .map(|run| run.aggregated.total_needs as f64)
        .collect();
    let count_stability = clamp01(1.0 - coefficient_of_variation(&counts));

    StatementConsistency {
        score: clamp01((keyword_overlap + count_stability) / 2.0),
        keyword_overlap,
        count_stability,
        mean_needs_per_run: mean(&counts),
    }
}

fn interview_consistency(runs: &[PipelineResult]) -> InterviewConsistency {
    let mean_answer_lengths: Vec<f64> = runs
        .iter()
        .map(|run| {
            let lengths: Vec<f64> = run
                .interviews
                .iter()
                .flat_map(|interview| interview.exchanges.iter())
                .map(|qa| qa.answer.chars().count() as f64)
                .collect();
            mean(&lengths)
        })
        .collect();

    InterviewConsistency {
        score: clamp01(1.0 - std_dev(&mean_answer_lengths) / ANSWER_LENGTH_NORMALIZATION),
        mean_answer_lengths,
    }
}

/// Clamp into [0, 1]; non-finite values collapse to 0.
fn clamp01(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation.
fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let variance = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
    variance.sqrt()
}

/// Standard deviation relative to the mean; zero-mean inputs read as
/// perfectly stable (all values are identical zeros).
fn coefficient_of_variation(xs: &[f64]) -> f64 {
    let m = mean(xs);
    if m.abs() < f64::EPSILON {
        return 0.0;
    }
    std_dev(xs) / m
}

/// Cosine similarity. Two zero vectors are identical (1.0); one zero
/// vector against a non-zero one shares nothing (0.0).
///
/// Works through squared norms so identical vectors read exactly 1.0;
/// rooting the norms first leaves a one-ulp residue. All inputs here are
/// non-negative, so the squared form loses no sign information.
fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let sq_a = a.iter().map(|x| x * x).sum::<f64>();
    let sq_b = b.iter().map(|x| x * x).sum::<f64>();
    if sq_a == 0.0 && sq_b == 0.0 {
        return 1.0;
    }
    if sq_a == 0.0 || sq_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    ((dot * dot) / (sq_a * sq_b)).sqrt()
}

/// Jaccard similarity of two sets. Two empty sets are identical (1.0).
fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Mean of `sim` over all unordered pairs; a single item has no pairs and
/// is perfectly self-consistent.
fn mean_pairwise<T>(items: &[T], sim: impl Fn(&T, &T) -> f64) -> f64 {
    if items.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            total += sim(&items[i], &items[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}
