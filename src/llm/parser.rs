//! LLM response parsing
//!
//! Raw completions are coerced into the closed label set in four stages, each a
//! separate function:
//!
//! 1. [`ResponseParser::strip_reasoning`] removes `<tag>...</tag>` reasoning blocks
//!    (and everything after an unclosed opening tag)
//! 2. [`candidate_lines`] splits the answer into lines with "N." numbering removed
//! 3. [`match_label`] validates a line against the label tokens; lines that resolve
//!    to nothing are dropped before labels are assigned by position
//! 4. keyword recovery ([`ResponseParser::recover_line`] and the message cues of
//!    [`KeywordPolicy`]) for whatever the first three stages could not resolve
//!
//! Batch parsing always yields exactly one label per submitted entry.

use crate::classify::{Label, LogEntry};
use crate::patterns::KeywordPolicy;

/// Answers shorter than this after stripping are treated as "reasoning only"
const MIN_ANSWER_CHARS: usize = 10;

/// Phrases recognised when a single-message reply has no `<category>` tag
const PHRASES: [(&str, Label); 6] = [
    ("workflow error", Label::WorkflowError),
    ("deprecation warning", Label::DeprecationWarning),
    ("user action", Label::UserAction),
    ("system notification", Label::SystemNotification),
    ("security alert", Label::SecurityAlert),
    ("unclassified", Label::Unclassified),
];

#[derive(Debug, Clone)]
pub struct ResponseParser {
    open_tag: String,
    close_tag: String,
    keywords: KeywordPolicy,
}

impl ResponseParser {
    pub fn new(reasoning_tag: &str, keywords: KeywordPolicy) -> Self {
        Self {
            open_tag: format!("<{}>", reasoning_tag),
            close_tag: format!("</{}>", reasoning_tag),
            keywords,
        }
    }

    /// Stage 1: drop reasoning blocks
    pub fn strip_reasoning(&self, raw: &str) -> String {
        let mut answer = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(start) = rest.find(&self.open_tag) {
            answer.push_str(&rest[..start]);
            let inside = &rest[start + self.open_tag.len()..];
            match inside.find(&self.close_tag) {
                Some(end) => rest = &inside[end + self.close_tag.len()..],
                None => {
                    tracing::warn!("Unclosed reasoning block in LLM response, dropping trailing text");
                    return answer;
                }
            }
        }

        answer.push_str(rest);
        answer
    }

    /// Parse a batch response into exactly `entries.len()` labels
    pub fn parse_batch(&self, raw: &str, entries: &[LogEntry]) -> Vec<Label> {
        let n = entries.len();
        let answer = self.strip_reasoning(raw);
        let lines = candidate_lines(&answer, n);

        // Preamble and commentary lines name no label; they must not take a slot
        let resolved: Vec<Label> = lines
            .iter()
            .filter_map(|line| self.resolve_line(line))
            .collect();

        if answer.trim().chars().count() < MIN_ANSWER_CHARS && resolved.is_empty() {
            tracing::warn!("LLM response was mostly reasoning, inferring labels from keywords");
            return self.infer_without_answer(raw, entries);
        }

        if resolved.len() != n {
            tracing::debug!(
                "LLM returned {} usable lines ({} total) for {} entries, applying fallbacks",
                resolved.len(),
                lines.len(),
                n
            );
        }

        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                resolved
                    .get(i)
                    .copied()
                    .or_else(|| self.keywords.infer_from_message(&entry.message))
                    .unwrap_or(Label::Unclassified)
            })
            .collect()
    }

    fn resolve_line(&self, line: &str) -> Option<Label> {
        match_label(line).or_else(|| self.recover_line(line))
    }

    /// Stage 4 for a single line: abbreviated token, then failure vocabulary
    pub fn recover_line(&self, line: &str) -> Option<Label> {
        let first_word = line
            .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
            .find(|w| !w.is_empty())
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .unwrap_or_default();

        self.keywords
            .expand_abbreviation(first_word)
            .or_else(|| self.keywords.mentions_failure(line).then_some(Label::WorkflowError))
    }

    /// Labels for a response that never got past its reasoning. The reasoning text
    /// speaks for the first entry; the rest rely on their own message cues.
    fn infer_without_answer(&self, raw: &str, entries: &[LogEntry]) -> Vec<Label> {
        let from_reasoning = self.keywords.infer_from_reasoning(raw);

        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                from_reasoning
                    .filter(|_| i == 0)
                    .or_else(|| self.keywords.infer_from_message(&entry.message))
                    .unwrap_or(Label::Unclassified)
            })
            .collect()
    }

    /// Parse a single-message reply: `<category>` tag first, then known phrases
    pub fn parse_single(&self, raw: &str) -> Option<Label> {
        let answer = self.strip_reasoning(raw);
        if let Some(category) = extract_tag(&answer, "category") {
            return Some(normalize_alias(category));
        }

        let lowered = answer.to_lowercase();
        PHRASES
            .iter()
            .find(|(phrase, _)| lowered.contains(phrase))
            .map(|(_, label)| *label)
            .or_else(|| match_label(&answer))
    }
}

/// Stage 2: non-empty lines with list numbering removed. When the model produced
/// more lines than requested, only lines mentioning a label are kept.
pub fn candidate_lines(answer: &str, expected: usize) -> Vec<String> {
    let lines: Vec<String> = answer
        .lines()
        .map(strip_numbering)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if lines.len() > expected {
        let labelled: Vec<String> = lines
            .iter()
            .filter(|line| match_label(line).is_some())
            .cloned()
            .collect();
        if !labelled.is_empty() {
            return labelled;
        }
    }
    lines
}

fn strip_numbering(line: &str) -> &str {
    let line = line.trim();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')', ':']) {
            return rest.trim();
        }
    }
    line.trim_start_matches(['-', '*']).trim()
}

/// Stage 3: exact label token, else the first label token contained in the line
pub fn match_label(line: &str) -> Option<Label> {
    let cleaned = line
        .trim()
        .trim_matches(|c: char| c == '*' || c == '`' || c == '"' || c == '\'' || c == '.');
    // "Workflow Error" and "workflow-error" read as workflow_error
    let lowered = cleaned.to_ascii_lowercase().replace([' ', '-'], "_");
    if let Some(label) = Label::from_token(&lowered) {
        return Some(label);
    }

    Label::CLASSIFICATIONS
        .iter()
        .filter_map(|label| lowered.find(label.as_str()).map(|pos| (pos, *label)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, label)| label)
}

/// Content of the first `<tag>...</tag>` pair, case-insensitive
fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let lowered = text.to_ascii_lowercase();
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    let start = lowered.find(&open)? + open.len();
    let end = start + lowered[start..].find(&close)?;
    Some(text[start..end].trim())
}

/// Map free-form category names onto the closed label set
pub fn normalize_alias(raw: &str) -> Label {
    let normalized = raw.trim().to_lowercase().replace(['-', '_'], " ");

    match normalized.as_str() {
        "workflow error" | "error" => Label::WorkflowError,
        "deprecation warning" | "warning" | "deprecated" => Label::DeprecationWarning,
        "user action" | "user" => Label::UserAction,
        "system notification" | "notification" | "system" => Label::SystemNotification,
        "security alert" | "security" => Label::SecurityAlert,
        _ => Label::Unclassified,
    }
}
