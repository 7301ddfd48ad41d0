//! Structured extraction from generative model output.
//!
//! - [`extract_analysis`] recovers an [`AnalysisRecord`](crate::AnalysisRecord)
//!   through ordered JSON recovery strategies and fails when none applies.
//! - [`extract_solution`] recovers a [`SolutionRecord`] and never fails: a
//!   JSON-shaped answer is used when present, labelled sections fill the gaps.

mod json;
mod sections;

pub use json::{extract_analysis, recover_json, RecoveryStrategy};
pub use sections::{scan_sections, solution_from_sections, split_steps, Section};

use serde::Deserialize;
use tracing::debug;

use crate::records::{string_list, SolutionRecord};

/// JSON shape some models use instead of labelled sections.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSolution {
    #[serde(default, alias = "thinking", alias = "approach")]
    reasoning: Option<String>,
    #[serde(default)]
    steps: Option<serde_json::Value>,
    #[serde(default, alias = "answer", alias = "final_answer")]
    final_answer: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

impl From<RawSolution> for SolutionRecord {
    fn from(raw: RawSolution) -> Self {
        let steps = match raw.steps {
            Some(serde_json::Value::String(body)) => split_steps(&body),
            other => string_list(other)
                .iter()
                .flat_map(|step| split_steps(step))
                .collect(),
        };
        let text = |field: Option<String>| field.unwrap_or_default().trim().to_string();
        Self {
            reasoning: text(raw.reasoning),
            steps,
            final_answer: text(raw.final_answer),
            summary: text(raw.summary),
        }
    }
}

/// Recovers a [`SolutionRecord`] from generation output.
///
/// Fields found in a JSON object take precedence; any field left empty is
/// filled from labelled sections. Missing sections stay empty.
#[must_use]
pub fn extract_solution(text: &str) -> SolutionRecord {
    let from_sections = solution_from_sections(text);

    let Some((raw, strategy)) = recover_json::<RawSolution>(text) else {
        return from_sections;
    };
    let mut solution = SolutionRecord::from(raw);
    if solution.is_empty() {
        return from_sections;
    }
    debug!(strategy = strategy.name(), "Solution recovered from JSON");

    if solution.reasoning.is_empty() {
        solution.reasoning = from_sections.reasoning;
    }
    if solution.steps.is_empty() {
        solution.steps = from_sections.steps;
    }
    if solution.final_answer.is_empty() {
        solution.final_answer = from_sections.final_answer;
    }
    if solution.summary.is_empty() {
        solution.summary = from_sections.summary;
    }
    solution
}
