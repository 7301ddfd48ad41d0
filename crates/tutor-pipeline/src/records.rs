//! Typed records produced by the pipeline.
//!
//! [`AnalysisRecord`] and [`SolutionRecord`] are recovered from free-form
//! model output, so their deserializers are lenient about key names and
//! value spelling. Serialization always uses the canonical camelCase form.

use serde::{Deserialize, Serialize};

use crate::error::Stage;

// ============================================================================
// Category and Difficulty
// ============================================================================

/// The kind of question being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Pick one or more options.
    MultipleChoice,
    /// Fill in a missing value.
    FillIn,
    /// Open working towards an answer.
    FreeResponse,
    /// Decide whether a statement holds.
    TrueFalse,
}

impl Category {
    /// Parses a category label, ignoring case and separator style.
    ///
    /// Accepts the canonical names (`multiple-choice`, `fill-in`,
    /// `free-response`, `true-false`), common variants and Chinese labels.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match normalize_label(s).as_str() {
            "multiple-choice" | "multiplechoice" | "choice" | "single-choice" | "选择"
            | "选择题" => Some(Self::MultipleChoice),
            "fill-in" | "fill-in-the-blank" | "fill-in-blank" | "fill-blank" | "blank"
            | "填空" | "填空题" => Some(Self::FillIn),
            "free-response" | "open-ended" | "short-answer" | "solution" | "worked" | "解答"
            | "解答题" => Some(Self::FreeResponse),
            "true-false" | "true-or-false" | "truefalse" | "judgement" | "judgment" | "判断"
            | "判断题" => Some(Self::TrueFalse),
            _ => None,
        }
    }

    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleChoice => "multiple-choice",
            Self::FillIn => "fill-in",
            Self::FreeResponse => "free-response",
            Self::TrueFalse => "true-false",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid category '{s}': expected one of 'multiple-choice', 'fill-in', 'free-response', 'true-false'"
            ))
        })
    }
}

impl Serialize for Category {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// How hard the problem is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Difficulty {
    /// Routine exercise.
    Easy,
    /// Needs a couple of steps (default).
    #[default]
    Medium,
    /// Multi-step or non-obvious.
    Hard,
}

impl Difficulty {
    /// Parses a difficulty label, ignoring case.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match normalize_label(s).as_str() {
            "easy" | "simple" | "简单" | "容易" => Some(Self::Easy),
            "medium" | "moderate" | "intermediate" | "中等" | "适中" => Some(Self::Medium),
            "hard" | "difficult" | "困难" | "难" => Some(Self::Hard),
            _ => None,
        }
    }

    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid difficulty '{s}': expected one of 'easy', 'medium', 'hard'"
            ))
        })
    }
}

impl Serialize for Difficulty {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

fn normalize_label(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .collect()
}

// ============================================================================
// AnalysisRecord
// ============================================================================

/// Classification of a recognized problem.
///
/// Invariants: `subject` is non-empty and `topics` holds at least one entry.
///
/// # Examples
///
/// ```
/// use tutor_pipeline::{AnalysisRecord, Category, Difficulty};
///
/// let record: AnalysisRecord = serde_json::from_str(
///     r#"{"type": "填空", "subject": "math", "knowledgePoints": "arithmetic", "difficulty": "EASY"}"#,
/// ).unwrap();
/// assert_eq!(record.category, Category::FillIn);
/// assert_eq!(record.topics, vec!["arithmetic"]);
/// assert_eq!(record.difficulty, Difficulty::Easy);
/// assert!(record.prerequisites.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawAnalysis")]
pub struct AnalysisRecord {
    /// The kind of question.
    pub category: Category,
    /// Academic subject, e.g. "math".
    pub subject: String,
    /// Knowledge points exercised by the problem.
    pub topics: Vec<String>,
    /// Estimated difficulty.
    pub difficulty: Difficulty,
    /// Concepts a student needs beforehand.
    pub prerequisites: Vec<String>,
}

/// Wire shape accepted from model output before validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    #[serde(alias = "type", alias = "questionType")]
    category: Option<String>,
    subject: Option<String>,
    #[serde(default, alias = "knowledgePoints", alias = "knowledge_points")]
    topics: Option<serde_json::Value>,
    difficulty: Option<String>,
    #[serde(default)]
    prerequisites: Option<serde_json::Value>,
}

impl TryFrom<RawAnalysis> for AnalysisRecord {
    type Error = String;

    fn try_from(raw: RawAnalysis) -> std::result::Result<Self, Self::Error> {
        let label = raw.category.ok_or("missing category")?;
        let category = Category::from_str_case_insensitive(&label)
            .ok_or_else(|| format!("invalid category '{label}'"))?;

        let subject = raw.subject.unwrap_or_default().trim().to_string();
        if subject.is_empty() {
            return Err("missing subject".to_string());
        }

        let topics = string_list(raw.topics);
        if topics.is_empty() {
            return Err("topics must not be empty".to_string());
        }

        let difficulty = match raw.difficulty {
            Some(label) if !label.trim().is_empty() => Difficulty::from_str_case_insensitive(&label)
                .ok_or_else(|| format!("invalid difficulty '{label}'"))?,
            _ => Difficulty::default(),
        };

        Ok(Self {
            category,
            subject,
            topics,
            difficulty,
            prerequisites: string_list(raw.prerequisites),
        })
    }
}

/// Flattens a JSON array or delimited string into trimmed, non-empty items.
pub(crate) fn string_list(value: Option<serde_json::Value>) -> Vec<String> {
    use serde_json::Value;

    let items: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) => s
            .split(|c| matches!(c, ',' | '，' | '、' | ';' | '；' | '\n'))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// SolutionRecord
// ============================================================================

/// A worked solution. Missing sections stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionRecord {
    /// Approach taken before working the problem.
    #[serde(default)]
    pub reasoning: String,
    /// Ordered working steps.
    #[serde(default)]
    pub steps: Vec<String>,
    /// The answer itself.
    #[serde(default)]
    pub final_answer: String,
    /// Takeaways for the student.
    #[serde(default)]
    pub summary: String,
}

impl SolutionRecord {
    /// Returns `true` if no section carries content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reasoning.is_empty()
            && self.steps.is_empty()
            && self.final_answer.is_empty()
            && self.summary.is_empty()
    }
}

// ============================================================================
// PipelineStatus
// ============================================================================

/// Progress of a single pipeline run.
///
/// The status transitions through these states:
/// - `Start` -> `Recognized` -> `Analyzed` -> `Solved`
/// - any non-terminal state -> `Failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Nothing has run yet.
    #[default]
    Start,
    /// Problem text is available.
    Recognized,
    /// Analysis record is available.
    Analyzed,
    /// Solution is available.
    Solved,
    /// A stage failed; earlier outputs are kept.
    Failed,
}

impl PipelineStatus {
    /// Returns `true` if this status represents a terminal state.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_pipeline::PipelineStatus;
    ///
    /// assert!(PipelineStatus::Solved.is_terminal());
    /// assert!(PipelineStatus::Failed.is_terminal());
    /// assert!(!PipelineStatus::Analyzed.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Solved | Self::Failed)
    }

    /// Returns `true` if `next` is a legal successor of this status.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Start, Self::Recognized)
                | (Self::Recognized, Self::Analyzed)
                | (Self::Analyzed, Self::Solved)
                | (Self::Start | Self::Recognized | Self::Analyzed, Self::Failed)
        )
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Recognized => write!(f, "recognized"),
            Self::Analyzed => write!(f, "analyzed"),
            Self::Solved => write!(f, "solved"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// PipelineResult
// ============================================================================

/// User-facing description of a failed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// The stage that failed.
    pub stage: Stage,
    /// Message safe to show to end users.
    pub message: String,
}

/// Outcome of one pipeline run.
///
/// On failure every field produced before the failing stage is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// Problem text, transcribed or as typed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognized_text: Option<String>,
    /// Classification of the problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisRecord>,
    /// Worked solution (synchronous runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<SolutionRecord>,
    /// Set when a stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Identifier of the stored history record, if one was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,
}

impl PipelineResult {
    /// Returns `true` if no stage failed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
