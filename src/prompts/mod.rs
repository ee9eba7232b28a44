//! Prompt builders for the four elicitation stages.
//!
//! Each stage has a `build_*_prompt` function over a `const` template with
//! `{placeholder}` substitution. Templates instruct the model toward
//! machine-parseable output: markdown field lines for personas, numbered
//! steps for experiences, `A1:`-prefixed answers for interviews, and strict
//! JSON for need extraction.

use crate::pipeline::{Agent, Experience, Interview};

/// Context line used for the first persona prompt, before any personas
/// exist.
pub const FIRST_AGENT_CONTEXT: &str = "None yet - this is the first persona.";

const AGENT_GENERATION_TEMPLATE: &str = r#"We are eliciting requirements for the following product:

Product: {product}
Design context: {context}

Create ONE new user persona for this product. The persona must be clearly
distinct from the personas already created:

{existing_personas}

Respond in markdown with exactly these fields:

**Name**: <full name>
**Age**: <age in years>
**Gender**: <gender>
**Description**: <2-3 sentences about who they are and how they would use the product>
**Rationale**: <1-2 sentences on what perspective this persona adds>
"#;

const EXPERIENCE_SIMULATION_TEMPLATE: &str = r#"You are {name}. {description}

Walk through your first real session using this product:

Product: {product}
Design context: {context}

Narrate 3 to 5 concrete steps of your experience. Format each step as:

Step <n>:
Action: <what you did>
Observation: <what you noticed>
Challenge: <what was difficult or frustrating, if anything>
"#;

const INTERVIEW_TEMPLATE: &str = r#"You are {name}. {description}

You just had the following experience with {product}:

{experience}

An interviewer asks you the questions below. Answer each one in character,
drawing on the experience above. Prefix each answer with A1:, A2:, and so on,
matching the question numbers.

{questions}
"#;

const NEED_EXTRACTION_TEMPLATE: &str = r#"Below is an interview with {name} about {product}.

{interview}

Extract the latent user needs revealed by this interview. Respond with JSON
only, in this exact shape:

{
  "needs": [
    {
      "category": "<one of: Functional, Usability, Performance, Safety, Emotional, Social, Accessibility>",
      "need_statement": "<one sentence stating the need>",
      "evidence": "<short quote or paraphrase from the interview>",
      "priority": "<High, Medium, or Low>",
      "design_implication": "<one sentence on what the design should do>"
    }
  ]
}
"#;

/// Build the persona generation prompt for one agent.
///
/// `existing` carries the personas generated so far in this run so the model
/// can diversify; the first call embeds [`FIRST_AGENT_CONTEXT`] instead.
pub fn build_generation_prompt(product: &str, context: &str, existing: &[Agent]) -> String {
    let existing_personas = if existing.is_empty() {
        FIRST_AGENT_CONTEXT.to_string()
    } else {
        existing
            .iter()
            .map(|agent| format!("- {}: {}", agent.name, agent.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    AGENT_GENERATION_TEMPLATE
        .replace("{product}", product)
        .replace("{context}", context)
        .replace("{existing_personas}", &existing_personas)
}

/// Build the experience simulation prompt for one agent.
pub fn build_simulation_prompt(product: &str, context: &str, agent: &Agent) -> String {
    EXPERIENCE_SIMULATION_TEMPLATE
        .replace("{name}", &agent.name)
        .replace("{description}", &agent.description)
        .replace("{product}", product)
        .replace("{context}", context)
}

/// Build the interview prompt for one agent and their experience.
pub fn build_interview_prompt(
    product: &str,
    agent: &Agent,
    experience: &Experience,
    questions: &[String],
) -> String {
    let numbered = questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("Q{}: {}", i + 1, q))
        .collect::<Vec<_>>()
        .join("\n");

    INTERVIEW_TEMPLATE
        .replace("{name}", &agent.name)
        .replace("{description}", &agent.description)
        .replace("{product}", product)
        .replace("{experience}", &experience.raw)
        .replace("{questions}", &numbered)
}

/// Build the need extraction prompt for one agent's interview.
pub fn build_extraction_prompt(product: &str, agent: &Agent, interview: &Interview) -> String {
    let transcript = interview
        .exchanges
        .iter()
        .enumerate()
        .map(|(i, qa)| format!("Q{}: {}\nA{}: {}", i + 1, qa.question, i + 1, qa.answer))
        .collect::<Vec<_>>()
        .join("\n\n");

    NEED_EXTRACTION_TEMPLATE
        .replace("{name}", &agent.name)
        .replace("{product}", product)
        .replace("{interview}", &transcript)
}
