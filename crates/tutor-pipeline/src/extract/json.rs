//! JSON recovery from free-form model output.
//!
//! Models asked for "JSON only" still wrap it in prose, code fences or a
//! byte-order mark. Each [`RecoveryStrategy`] proposes one candidate slice of
//! the text; the first candidate that deserializes into the target type wins.

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ExtractionError;
use crate::records::AnalysisRecord;

/// One way of locating a JSON document inside model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// The whole text, trimmed.
    Direct,
    /// The body of the first fenced code block.
    Fenced,
    /// The first balanced `{...}` span.
    BalancedBraces,
    /// The text with a leading byte-order mark removed.
    StripBom,
}

impl RecoveryStrategy {
    /// All strategies, in the order they are tried.
    pub const ALL: [Self; 4] = [
        Self::Direct,
        Self::Fenced,
        Self::BalancedBraces,
        Self::StripBom,
    ];

    /// Returns the candidate slice this strategy proposes, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_pipeline::extract::RecoveryStrategy;
    ///
    /// let text = "Sure! Here it is: {\"a\": \"}\"} hope that helps";
    /// assert_eq!(RecoveryStrategy::BalancedBraces.candidate(text), Some("{\"a\": \"}\"}"));
    /// assert_eq!(RecoveryStrategy::Fenced.candidate(text), None);
    /// ```
    #[must_use]
    pub fn candidate(self, text: &str) -> Option<&str> {
        match self {
            Self::Direct => Some(text.trim()),
            Self::Fenced => fenced_block(text),
            Self::BalancedBraces => balanced_object(text),
            Self::StripBom => text
                .trim_start()
                .strip_prefix('\u{feff}')
                .map(str::trim),
        }
    }

    /// Returns the strategy name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Fenced => "fenced",
            Self::BalancedBraces => "balanced_braces",
            Self::StripBom => "strip_bom",
        }
    }
}

/// Tries every strategy in order and returns the first value that parses.
pub fn recover_json<T: DeserializeOwned>(text: &str) -> Option<(T, RecoveryStrategy)> {
    for strategy in RecoveryStrategy::ALL {
        let Some(candidate) = strategy.candidate(text) else {
            continue;
        };
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => {
                debug!(strategy = strategy.name(), "Recovered JSON from model output");
                return Some((value, strategy));
            }
            Err(e) => {
                debug!(strategy = strategy.name(), error = %e, "JSON candidate rejected");
            }
        }
    }
    None
}

/// Recovers an [`AnalysisRecord`] from model output.
///
/// A candidate that parses but breaks the record invariants counts as a
/// failed strategy. Nothing is substituted on failure.
///
/// # Errors
///
/// Returns `ExtractionError` with kind `UnparsableAnalysis` carrying the raw
/// text when no strategy succeeds.
pub fn extract_analysis(text: &str) -> Result<AnalysisRecord, ExtractionError> {
    recover_json::<AnalysisRecord>(text)
        .map(|(record, _)| record)
        .ok_or_else(|| ExtractionError::unparsable_analysis(text))
}

/// Body of the first ```` ``` ```` block, with any language tag skipped.
///
/// An unterminated fence yields nothing.
fn fenced_block(text: &str) -> Option<&str> {
    const FENCE: &str = "```";

    let open = text.find(FENCE)?;
    let after_open = &text[open + FENCE.len()..];

    // A tag is a single word on the fence line; anything else is content.
    let body_start = match after_open.find('\n') {
        Some(newline)
            if after_open[..newline]
                .trim()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            newline + 1
        }
        _ => 0,
    };

    let body = &after_open[body_start..];
    let close = body.find(FENCE)?;
    Some(body[..close].trim())
}

/// The leftmost `{` through its matching `}`, ignoring braces inside strings.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
