//! Section recovery for labelled solution text.
//!
//! The generation prompt asks for four bracketed sections. Models reorder
//! them, drop some, or repeat a label inside the text, so the scanner records
//! every recognized marker in one pass and then slices the text between
//! consecutive markers. The first occurrence of each section wins.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::records::SolutionRecord;

/// A labelled part of a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// How to approach the problem.
    Reasoning,
    /// The working, one step per line.
    Steps,
    /// The final answer.
    Answer,
    /// Takeaways.
    Summary,
}

/// Recognized markers. ASCII labels match case-insensitively.
const MARKERS: &[(&str, Section)] = &[
    ("[reasoning]", Section::Reasoning),
    ("[steps]", Section::Steps),
    ("[answer]", Section::Answer),
    ("[final answer]", Section::Answer),
    ("[summary]", Section::Summary),
    ("【解题思路】", Section::Reasoning),
    ("【详细步骤】", Section::Steps),
    ("【解题步骤】", Section::Steps),
    ("【最终答案】", Section::Answer),
    ("【知识总结】", Section::Summary),
];

/// A marker occurrence: byte range of the label and the section it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Marker {
    start: usize,
    end: usize,
    section: Section,
}

/// Finds every marker, left to right, in a single pass over the text.
fn scan_markers(text: &str) -> Vec<Marker> {
    let bytes = text.as_bytes();
    let mut markers = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let found = MARKERS.iter().find(|(label, _)| {
            bytes
                .get(pos..pos + label.len())
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(label.as_bytes()))
        });
        match found {
            Some((label, section)) => {
                markers.push(Marker {
                    start: pos,
                    end: pos + label.len(),
                    section: *section,
                });
                pos += label.len();
            }
            None => pos += 1,
        }
    }
    markers
}

/// Returns the trimmed body of each section present in `text`.
///
/// Each body runs from the end of its marker to the start of the next
/// recognized marker or the end of the text.
#[must_use]
pub fn scan_sections(text: &str) -> Vec<(Section, &str)> {
    let markers = scan_markers(text);
    let mut sections: Vec<(Section, &str)> = Vec::with_capacity(4);

    for (index, marker) in markers.iter().enumerate() {
        if sections.iter().any(|(seen, _)| *seen == marker.section) {
            continue;
        }
        let end = markers.get(index + 1).map_or(text.len(), |next| next.start);
        let body = text[marker.end..end]
            .trim_start_matches([':', '：'])
            .trim();
        sections.push((marker.section, body));
    }
    sections
}

/// Builds a [`SolutionRecord`] from labelled text. Never fails.
///
/// # Examples
///
/// ```
/// use tutor_pipeline::extract::solution_from_sections;
///
/// let solution = solution_from_sections("[Answer] 4\n[Reasoning] Add them.");
/// assert_eq!(solution.final_answer, "4");
/// assert_eq!(solution.reasoning, "Add them.");
/// assert!(solution.steps.is_empty());
/// assert!(solution.summary.is_empty());
/// ```
#[must_use]
pub fn solution_from_sections(text: &str) -> SolutionRecord {
    let mut solution = SolutionRecord::default();
    for (section, body) in scan_sections(text) {
        match section {
            Section::Reasoning => solution.reasoning = body.to_string(),
            Section::Steps => solution.steps = split_steps(body),
            Section::Answer => solution.final_answer = body.to_string(),
            Section::Summary => solution.summary = body.to_string(),
        }
    }
    solution
}

/// Ordinal and bullet prefixes: `1.`, `2)`, `3、`, `(4)`, `Step 5:`, `第六步`, `-`.
static STEP_PREFIX: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"^(?:\(\d+\)|（\d+）|\d+[.、)）:：]|[-*•·]|(?i:step)\s*\d+\s*[:.：)]?|第[一二三四五六七八九十百零\d]+步[:：、.]?)\s*",
    )
    .ok()
});

/// Splits a steps body into lines without their ordinal prefixes.
///
/// A number glued to the text that follows is not an ordinal, so `1.5 m/s`,
/// `3:4`, `1:30 pm` and `-3` survive intact.
#[must_use]
pub fn split_steps(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(strip_step_prefix)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_step_prefix(line: &str) -> &str {
    let Some(re) = STEP_PREFIX.as_ref() else {
        return line;
    };
    let Some(found) = re.find(line) else {
        return line;
    };
    let rest = &line[found.end()..];
    let mut tail = found.as_str().chars().rev();
    let numeric_glue = match (tail.next(), tail.next()) {
        (Some('.' | ':' | '：'), Some(prev)) => prev.is_ascii_digit(),
        (Some('-'), None) => true,
        _ => false,
    };
    if numeric_glue && rest.starts_with(|c: char| c.is_ascii_digit()) {
        return line;
    }
    rest.trim()
}
