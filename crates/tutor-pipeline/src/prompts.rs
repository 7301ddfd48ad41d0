//! Stage instructions and sampling parameters.

use crate::records::AnalysisRecord;

/// Sampling parameters for one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageParams {
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token ceiling.
    pub max_tokens: u32,
}

/// Recognition favours a literal transcription.
pub const RECOGNITION_PARAMS: StageParams = StageParams {
    temperature: 0.1,
    max_tokens: 2000,
};

/// Analysis must produce a small, stable JSON object.
pub const ANALYSIS_PARAMS: StageParams = StageParams {
    temperature: 0.1,
    max_tokens: 1600,
};

/// Synchronous solution generation.
pub const GENERATION_PARAMS: StageParams = StageParams {
    temperature: 0.7,
    max_tokens: 1024,
};

/// Streamed solution generation.
pub const STREAMING_GENERATION_PARAMS: StageParams = StageParams {
    temperature: 0.7,
    max_tokens: 2000,
};

/// Instruction sent with the problem image.
pub const RECOGNITION_INSTRUCTION: &str = "Read the problem in this image carefully and \
transcribe all of its text, numbers and formulas. Keep the original layout; write math \
formulas as expressions. Output only the transcribed text, with no explanation or commentary.";

/// System instruction for the analysis stage.
pub const ANALYSIS_SYSTEM: &str = "You are an education analyst who classifies problems \
from every school subject. Respond with a single JSON object only: no markdown fences, no \
extra text.";

/// System instruction for the generation stage.
pub const GENERATION_SYSTEM: &str = "You are a patient teacher who explains solutions \
clearly and simply.";

/// Builds the analysis prompt for a recognized problem.
#[must_use]
pub fn analysis_prompt(problem: &str) -> String {
    format!(
        r#"Analyze the following problem.

Problem: {problem}

Answer with JSON in exactly this shape:
{{
    "category": "multiple-choice | fill-in | free-response | true-false",
    "subject": "the school subject",
    "topics": ["knowledge point 1", "knowledge point 2"],
    "difficulty": "easy | medium | hard",
    "prerequisites": ["prior knowledge 1", "prior knowledge 2"]
}}"#
    )
}

/// Builds the generation prompt from the problem and its analysis.
#[must_use]
pub fn generation_prompt(problem: &str, analysis: &AnalysisRecord) -> String {
    format!(
        "Give the student a detailed solution to this problem.

Problem: {problem}

Category: {category}
Subject: {subject}
Topics: {topics}
Difficulty: {difficulty}

Structure the answer with exactly these section labels, each on its own line:

[Reasoning]
How to approach the problem.

[Steps]
1. First step
2. Second step

[Answer]
The final answer only.

[Summary]
The method used and common mistakes to avoid.",
        category = analysis.category,
        subject = analysis.subject,
        topics = analysis.topics.join(", "),
        difficulty = analysis.difficulty,
    )
}
