//! Rule registry for configuration-driven classification
//!
//! This module provides:
//! - Pre-compiled, ordered regex rules (pattern → label) for the rule tier
//! - Keyword cue tables used to recover labels from unusable LLM output
//! - Abbreviation table for truncated label tokens
//!
//! Rules are evaluated in file order and matched case-insensitively. The `regex`
//! crate has no lookaround, so a rule may carry an `exclude` pattern: the rule only
//! fires when `pattern` matches and `exclude` does not.

use crate::classify::Label;
use crate::error::{Result, SieveError};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Built-in rules shipped with the binary
pub const DEFAULT_RULES_TOML: &str = include_str!("../../config-templates/rules.toml");

/// Single rule as written in the rules file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub name: String,
    pub label: Label,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
}

/// Keyword cue: fires when any `any` term occurs and, if `with_any` is non-empty,
/// at least one `with_any` term co-occurs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordCue {
    pub label: Label,
    pub any: Vec<String>,
    #[serde(default)]
    pub with_any: Vec<String>,
}

/// Abbreviated label token emitted by a truncated LLM response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Abbreviation {
    pub token: String,
    pub label: Label,
}

/// Keyword recovery tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordsConfig {
    /// Cues applied to a reasoning-only LLM response
    #[serde(default)]
    pub reasoning: Vec<KeywordCue>,
    /// Cues applied to an individual log message
    #[serde(default)]
    pub message: Vec<KeywordCue>,
    /// Terms that mark an unparseable response line as a workflow failure
    #[serde(default)]
    pub failure_terms: Vec<String>,
    #[serde(default)]
    pub abbreviations: Vec<Abbreviation>,
}

/// Rules file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rule: Vec<RuleConfig>,
    #[serde(default)]
    pub keywords: KeywordsConfig,
}

impl RulesConfig {
    /// Parse the built-in rules
    pub fn builtin() -> Result<Self> {
        Ok(toml::from_str(DEFAULT_RULES_TOML)?)
    }
}

/// Compiled classification rule
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub label: Label,
    pub regex: Regex,
    pub exclude: Option<Regex>,
}

impl CompiledRule {
    pub fn is_match(&self, message: &str) -> bool {
        self.regex.is_match(message)
            && !self
                .exclude
                .as_ref()
                .is_some_and(|exclude| exclude.is_match(message))
    }
}

/// Compiled keyword cue (terms lowercased once)
#[derive(Debug, Clone)]
struct CompiledCue {
    label: Label,
    any: Vec<String>,
    with_any: Vec<String>,
}

impl CompiledCue {
    fn from_config(cue: &KeywordCue) -> Self {
        Self {
            label: cue.label,
            any: cue.any.iter().map(|t| t.to_lowercase()).collect(),
            with_any: cue.with_any.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    fn fires(&self, lowered: &str) -> bool {
        self.any.iter().any(|t| lowered.contains(t.as_str()))
            && (self.with_any.is_empty()
                || self.with_any.iter().any(|t| lowered.contains(t.as_str())))
    }
}

/// Keyword heuristics used as the last resort of LLM response recovery
#[derive(Debug, Clone, Default)]
pub struct KeywordPolicy {
    reasoning: Vec<CompiledCue>,
    message: Vec<CompiledCue>,
    failure_terms: Vec<String>,
    abbreviations: Vec<(String, Label)>,
}

impl KeywordPolicy {
    pub fn from_config(config: &KeywordsConfig) -> Self {
        Self {
            reasoning: config.reasoning.iter().map(CompiledCue::from_config).collect(),
            message: config.message.iter().map(CompiledCue::from_config).collect(),
            failure_terms: config
                .failure_terms
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            abbreviations: config
                .abbreviations
                .iter()
                .map(|a| (a.token.to_lowercase(), a.label))
                .collect(),
        }
    }

    fn first_cue(cues: &[CompiledCue], text: &str) -> Option<Label> {
        let lowered = text.to_lowercase();
        cues.iter().find(|c| c.fires(&lowered)).map(|c| c.label)
    }

    /// Infer a label from free-form reasoning text
    pub fn infer_from_reasoning(&self, text: &str) -> Option<Label> {
        Self::first_cue(&self.reasoning, text)
    }

    /// Infer a label from a single log message
    pub fn infer_from_message(&self, message: &str) -> Option<Label> {
        Self::first_cue(&self.message, message)
    }

    /// Whether a response line reads like a failure description
    pub fn mentions_failure(&self, line: &str) -> bool {
        let lowered = line.to_lowercase();
        self.failure_terms
            .iter()
            .any(|t| lowered.contains(t.as_str()))
    }

    /// Expand an abbreviated label token
    pub fn expand_abbreviation(&self, token: &str) -> Option<Label> {
        let token = token.trim().to_lowercase();
        self.abbreviations
            .iter()
            .find(|(abbr, _)| *abbr == token)
            .map(|(_, label)| *label)
    }
}

/// Rule registry with all pre-compiled rules and keyword tables
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    /// Ordered rules, first match wins
    pub rules: Vec<CompiledRule>,
    pub keywords: KeywordPolicy,
}

impl RuleRegistry {
    /// Load the registry from a rules file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SieveError::Io {
            source: e,
            context: format!("Failed to read rules file: {:?}", path),
        })?;
        let config: RulesConfig = toml::from_str(&content)?;
        Self::from_config(config)
    }

    /// Load from `path` when it exists, otherwise fall back to the built-in rules
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_config_file(p),
            Some(p) => {
                tracing::warn!("Rules file {:?} not found, using built-in rules", p);
                Self::builtin()
            }
            None => Self::builtin(),
        }
    }

    /// Registry built from the embedded rules
    pub fn builtin() -> Result<Self> {
        Self::from_config(RulesConfig::builtin()?)
    }

    /// Build the registry from a parsed configuration
    pub fn from_config(config: RulesConfig) -> Result<Self> {
        let rules = config
            .rule
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                let name = if rule.name.is_empty() {
                    format!("rule_{}", idx)
                } else {
                    rule.name.clone()
                };

                let regex = compile_case_insensitive(&rule.pattern).map_err(|e| {
                    SieveError::Config(format!("Invalid pattern for rule '{}': {}", name, e))
                })?;

                let exclude = rule
                    .exclude
                    .as_deref()
                    .map(compile_case_insensitive)
                    .transpose()
                    .map_err(|e| {
                        SieveError::Config(format!(
                            "Invalid exclude pattern for rule '{}': {}",
                            name, e
                        ))
                    })?;

                if rule.label == Label::Cancelled {
                    return Err(SieveError::Config(format!(
                        "Rule '{}' cannot emit the cancelled label",
                        name
                    )));
                }

                Ok(CompiledRule {
                    name,
                    label: rule.label,
                    regex,
                    exclude,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Compiled {} classification rules", rules.len());

        Ok(Self {
            rules,
            keywords: KeywordPolicy::from_config(&config.keywords),
        })
    }

    /// First rule matching anywhere in the message
    pub fn first_match(&self, message: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.is_match(message))
    }
}

fn compile_case_insensitive(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_compile() {
        let registry = RuleRegistry::builtin().unwrap();
        assert!(!registry.rules.is_empty());
        assert!(registry.keywords.infer_from_message("backup done").is_some());
    }

    #[test]
    fn test_rule_order_first_match_wins() {
        let config = RulesConfig {
            rule: vec![
                RuleConfig {
                    name: "first".to_string(),
                    label: Label::WorkflowError,
                    pattern: "error".to_string(),
                    exclude: None,
                },
                RuleConfig {
                    name: "second".to_string(),
                    label: Label::SystemNotification,
                    pattern: "database".to_string(),
                    exclude: None,
                },
            ],
            keywords: KeywordsConfig::default(),
        };

        let registry = RuleRegistry::from_config(config).unwrap();
        let rule = registry.first_match("Database ERROR on shard 3").unwrap();
        assert_eq!(rule.name, "first");
    }

    #[test]
    fn test_exclude_pattern_blocks_match() {
        let config = RulesConfig {
            rule: vec![RuleConfig {
                name: "http".to_string(),
                label: Label::SystemNotification,
                pattern: r"(?:get|post).*\d{3}".to_string(),
                exclude: Some(r"(?:get|post).*(?:fail|error)".to_string()),
            }],
            keywords: KeywordsConfig::default(),
        };

        let registry = RuleRegistry::from_config(config).unwrap();
        assert!(registry.first_match("GET /api/users 200").is_some());
        assert!(registry.first_match("GET /api/users failed 500").is_none());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = RulesConfig {
            rule: vec![RuleConfig {
                name: "broken".to_string(),
                label: Label::UserAction,
                pattern: "(unclosed".to_string(),
                exclude: None,
            }],
            keywords: KeywordsConfig::default(),
        };

        let err = RuleRegistry::from_config(config).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_cancelled_label_rejected() {
        let config = RulesConfig {
            rule: vec![RuleConfig {
                name: "sentinel".to_string(),
                label: Label::Cancelled,
                pattern: "x".to_string(),
                exclude: None,
            }],
            keywords: KeywordsConfig::default(),
        };

        assert!(RuleRegistry::from_config(config).is_err());
    }

    #[test]
    fn test_keyword_cue_co_occurrence() {
        let registry = RuleRegistry::builtin().unwrap();
        let keywords = &registry.keywords;

        assert_eq!(
            keywords.infer_from_reasoning("the workflow step failed while escalating"),
            Some(Label::WorkflowError)
        );
        assert_eq!(
            keywords.infer_from_reasoning("looks like an unauthorized access attempt"),
            Some(Label::SecurityAlert)
        );
        assert_eq!(keywords.infer_from_reasoning("hmm, not sure"), None);
    }

    #[test]
    fn test_abbreviation_expansion() {
        let registry = RuleRegistry::builtin().unwrap();
        assert_eq!(
            registry.keywords.expand_abbreviation("Deprec"),
            Some(Label::DeprecationWarning)
        );
        assert_eq!(
            registry.keywords.expand_abbreviation("sys"),
            Some(Label::SystemNotification)
        );
        assert_eq!(registry.keywords.expand_abbreviation("xyz"), None);
    }
}
