// Prompt construction for the LLM tier
use super::ChatRequest;
use crate::classify::{Label, LogEntry};
use crate::config::LlmConfig;

pub const BATCH_SYSTEM_PROMPT: &str = "You are a precise log classifier. Output ONLY a numbered list \
with one category per line. No explanations, no thinking text, just the numbered classifications.";

fn category_list() -> String {
    Label::CLASSIFICATIONS
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Numbered prompt asking for one label line per entry
pub fn batch_prompt(entries: &[LogEntry]) -> String {
    let n = entries.len();
    let categories = category_list();

    let mut prompt = format!(
        "Classify each log message into exactly one category: {}.\n\nLog messages:\n",
        categories
    );
    for (i, entry) in entries.iter().enumerate() {
        prompt.push_str(&format!("{}. [{}] {}\n", i + 1, entry.source, entry.message));
    }
    prompt.push_str(&format!(
        "\nRespond with ONLY a numbered list of exactly {n} classifications (no explanations or thinking):\n\
         1. category_name\n\
         2. category_name\n\
         ... (continue for all {n} logs)\n\n\
         Valid categories ONLY: {categories}\n\n\
         Example response format:\n\
         1. workflow_error\n\
         2. user_action\n\
         3. system_notification"
    ));
    prompt
}

/// Single-message prompt asking for a `<category>` tag
pub fn single_prompt(message: &str) -> String {
    format!(
        "Classify the log message into one of these categories: \
         (1) Workflow Error, (2) Deprecation Warning, (3) User Action, \
         (4) System Notification, (5) Security Alert.\n\
         If you can't figure out a category, use \"Unclassified\".\n\
         Put the category inside <category> </category> tags.\n\
         Log message: {}",
        message
    )
}

/// Token budget for a batch of `n` entries
pub fn batch_token_budget(config: &LlmConfig, n: usize) -> u32 {
    let n = u32::try_from(n).unwrap_or(u32::MAX);
    config
        .base_max_tokens
        .saturating_add(config.max_tokens_per_entry.saturating_mul(n))
}

pub fn batch_request(entries: &[LogEntry], config: &LlmConfig) -> ChatRequest {
    ChatRequest {
        system: Some(BATCH_SYSTEM_PROMPT.to_string()),
        user: batch_prompt(entries),
        temperature: config.temperature,
        max_tokens: batch_token_budget(config, entries.len()),
    }
}

pub fn single_request(entry: &LogEntry, config: &LlmConfig) -> ChatRequest {
    ChatRequest {
        system: None,
        user: single_prompt(&entry.message),
        temperature: config.temperature,
        max_tokens: config.single_max_tokens,
    }
}
