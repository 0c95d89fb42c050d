// Shared types for the classification cascade
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

/// One log line submitted for classification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogEntry {
    /// Originating system (e.g. "ModernHR", "LegacyCRM")
    pub source: String,
    /// Free-text log message
    pub message: String,
}

impl LogEntry {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }

    /// Read one JSON object per line, skipping blank lines
    pub fn read_jsonl(reader: impl BufRead) -> crate::Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read input line {}", idx + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_str(&line)
                .with_context(|| format!("Invalid log entry on line {}", idx + 1))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Closed label set produced by every tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    UserAction,
    SystemNotification,
    WorkflowError,
    DeprecationWarning,
    SecurityAlert,
    Unclassified,
    /// Sentinel for entries left unresolved when a batch job was cancelled
    Cancelled,
}

impl Label {
    /// Labels a tier is allowed to emit (everything except the cancellation sentinel)
    pub const CLASSIFICATIONS: [Label; 6] = [
        Label::UserAction,
        Label::SystemNotification,
        Label::WorkflowError,
        Label::DeprecationWarning,
        Label::SecurityAlert,
        Label::Unclassified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::UserAction => "user_action",
            Label::SystemNotification => "system_notification",
            Label::WorkflowError => "workflow_error",
            Label::DeprecationWarning => "deprecation_warning",
            Label::SecurityAlert => "security_alert",
            Label::Unclassified => "unclassified",
            Label::Cancelled => "cancelled",
        }
    }

    /// Human readable name used in reports
    pub fn display_name(&self) -> &'static str {
        match self {
            Label::UserAction => "User Action",
            Label::SystemNotification => "System Notification",
            Label::WorkflowError => "Workflow Error",
            Label::DeprecationWarning => "Deprecation Warning",
            Label::SecurityAlert => "Security Alert",
            Label::Unclassified => "Unclassified",
            Label::Cancelled => "Cancelled",
        }
    }

    /// True for labels that count as a successful classification
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Label::Unclassified | Label::Cancelled)
    }

    /// Exact match of a classification token (case-insensitive, surrounding whitespace ignored).
    /// Never yields `Cancelled`.
    pub fn from_token(token: &str) -> Option<Label> {
        let token = token.trim().to_ascii_lowercase();
        Self::CLASSIFICATIONS
            .iter()
            .copied()
            .find(|label| label.as_str() == token)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("cancelled") {
            return Ok(Label::Cancelled);
        }
        Label::from_token(s).ok_or_else(|| format!("unknown label: {}", s))
    }
}

/// Tier that produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Regex,
    Model,
    Llm,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Regex => f.write_str("regex"),
            Tier::Model => f.write_str("model"),
            Tier::Llm => f.write_str("llm"),
        }
    }
}

/// Final outcome for one entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Label,
    /// Tier that resolved the entry; `None` when no tier did
    pub tier: Option<Tier>,
    /// Confidence in [0, 1] when the tier reports one
    pub confidence: Option<f32>,
}

impl ClassificationResult {
    pub fn resolved(label: Label, tier: Tier, confidence: Option<f32>) -> Self {
        Self {
            label,
            tier: Some(tier),
            confidence,
        }
    }

    pub fn unclassified() -> Self {
        Self {
            label: Label::Unclassified,
            tier: None,
            confidence: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            label: Label::Cancelled,
            tier: None,
            confidence: None,
        }
    }
}

impl Default for ClassificationResult {
    fn default() -> Self {
        Self::unclassified()
    }
}

/// Per-batch tier usage counters
///
/// `regex + model + llm + unclassified == total` always holds. Cancelled entries are
/// counted as unclassified and additionally reported in `cancelled`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStatistics {
    #[serde(rename = "total_processed")]
    pub total: usize,
    #[serde(rename = "regex_classified")]
    pub regex_count: usize,
    #[serde(rename = "model_classified", alias = "bert_classified")]
    pub model_count: usize,
    #[serde(rename = "llm_classified")]
    pub llm_count: usize,
    #[serde(rename = "unclassified")]
    pub unclassified_count: usize,
    #[serde(default)]
    pub cancelled: usize,
}

impl TierStatistics {
    /// Build statistics from final per-entry results
    pub fn from_results(results: &[ClassificationResult]) -> Self {
        let mut stats = Self {
            total: results.len(),
            ..Self::default()
        };

        for result in results {
            match (result.tier, result.label.is_resolved()) {
                (Some(Tier::Regex), true) => stats.regex_count += 1,
                (Some(Tier::Model), true) => stats.model_count += 1,
                (Some(Tier::Llm), true) => stats.llm_count += 1,
                _ => {
                    stats.unclassified_count += 1;
                    if result.label == Label::Cancelled {
                        stats.cancelled += 1;
                    }
                }
            }
        }

        stats
    }

    /// Check the sum invariant
    pub fn is_consistent(&self) -> bool {
        self.regex_count + self.model_count + self.llm_count + self.unclassified_count
            == self.total
    }

    fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.total as f64
        }
    }

    /// Emit the statistics at info level
    pub fn log_summary(&self) {
        tracing::info!(
            "Classification completed: Regex: {} ({:.1}%), Model: {} ({:.1}%), LLM: {} ({:.1}%), Unclassified: {} ({:.1}%)",
            self.regex_count,
            self.percent(self.regex_count),
            self.model_count,
            self.percent(self.model_count),
            self.llm_count,
            self.percent(self.llm_count),
            self.unclassified_count,
            self.percent(self.unclassified_count),
        );
    }
}

/// LLM batch requests slower than this are reported at warn level
pub const SLOW_LLM_BATCH_MS: u64 = 1000;

/// Wall-clock time spent in each phase of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub rule_ms: u64,
    pub model_ms: u64,
    pub llm_ms: u64,
    /// Chunks handed to the LLM tier
    pub llm_batches: usize,
    pub slowest_llm_batch_ms: u64,
}

impl PhaseTimings {
    /// Account one LLM chunk
    pub fn record_llm_batch(&mut self, elapsed_ms: u64) {
        self.llm_ms += elapsed_ms;
        self.llm_batches += 1;
        self.slowest_llm_batch_ms = self.slowest_llm_batch_ms.max(elapsed_ms);
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Phase timings: rules {} ms, model {} ms, LLM {} ms over {} batches",
            self.rule_ms,
            self.model_ms,
            self.llm_ms,
            self.llm_batches
        );
        if self.slowest_llm_batch_ms > SLOW_LLM_BATCH_MS {
            tracing::warn!("Slowest LLM batch took {} ms", self.slowest_llm_batch_ms);
        }
    }
}

/// Everything the orchestrator returns for one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// One result per input entry, in input order
    pub results: Vec<ClassificationResult>,
    pub stats: TierStatistics,
    /// True when the batch job was cancelled before completion
    pub cancelled: bool,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub timings: PhaseTimings,
}

impl BatchOutcome {
    /// Labels only, in input order
    pub fn labels(&self) -> Vec<Label> {
        self.results.iter().map(|r| r.label).collect()
    }
}
