/// LLM classification tier
///
/// Architecture:
/// - `LlmBackend` trait for chat-completion providers (`OpenAiCompatBackend` for Groq/OpenAI)
/// - Prompt builders for the numbered batch path and the `<category>` single path
/// - `ResponseParser` turning free text into exactly one label per entry
/// - `LlmClassifier` tying these together with caching, cancellation and rate-limit retries
mod backend;
mod parser;
mod prompt;

pub use backend::{LlmBackend, OpenAiCompatBackend};
pub use parser::{candidate_lines, match_label, normalize_alias, ResponseParser};
pub use prompt::{batch_prompt, batch_token_budget, single_prompt, BATCH_SYSTEM_PROMPT};

use crate::cache::{CacheKey, CacheLayer, CachePolicy};
use crate::classify::{Label, LogEntry};
use crate::config::LlmConfig;
use crate::patterns::KeywordPolicy;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Missing API credentials: environment variable {0} is not set")]
    MissingCredentials(String),

    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether the error calls for backoff-and-retry rather than giving up
    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimited(_) => true,
            LlmError::Api { status, body } => {
                *status == 429 || body.to_lowercase().contains("rate limit")
            }
            other => {
                let message = other.to_string().to_lowercase();
                message.contains("429") || message.contains("rate limit")
            }
        }
    }
}

/// One chat completion request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// LLM tier status report
#[derive(Debug, Clone, Serialize)]
pub struct LlmInfo {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub api_key_configured: bool,
    pub backend: Option<String>,
    pub max_batch_size: usize,
    pub max_retries: u32,
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(|token| token.is_cancelled())
}

/// Delay before retry number `attempt` (0-based): exponential, jittered, capped
pub fn retry_delay(config: &LlmConfig, attempt: u32, rng: &mut impl Rng) -> Duration {
    let exponential = config
        .backoff_base_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let jitter = if config.backoff_jitter_ms > 0 {
        rng.gen_range(0..=config.backoff_jitter_ms)
    } else {
        0
    };
    Duration::from_millis(exponential.saturating_add(jitter).min(config.backoff_max_ms))
}

/// LLM classifier for entries the cheaper tiers could not resolve
pub struct LlmClassifier {
    backend: Option<Arc<dyn LlmBackend>>,
    config: LlmConfig,
    parser: ResponseParser,
    cache: Arc<CacheLayer>,
    cache_ttl: Duration,
}

impl LlmClassifier {
    pub fn new(
        backend: Option<Arc<dyn LlmBackend>>,
        config: LlmConfig,
        keywords: KeywordPolicy,
        cache: Arc<CacheLayer>,
        cache_ttl: Duration,
    ) -> Self {
        let parser = ResponseParser::new(&config.reasoning_tag, keywords);
        Self {
            backend,
            config,
            parser,
            cache,
            cache_ttl,
        }
    }

    /// Build the classifier with the HTTP backend. A disabled tier or missing
    /// credentials leave the classifier without a backend, answering `unclassified`.
    pub fn from_config(
        config: &LlmConfig,
        keywords: KeywordPolicy,
        cache: Arc<CacheLayer>,
        cache_ttl: Duration,
    ) -> Self {
        let backend = if config.enabled {
            match OpenAiCompatBackend::from_config(config) {
                Ok(backend) => {
                    tracing::info!("LLM tier ready: {}", backend.name());
                    Some(Arc::new(backend) as Arc<dyn LlmBackend>)
                }
                Err(e) => {
                    tracing::warn!("LLM tier unavailable, entries reaching it stay unclassified: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("LLM tier disabled by configuration");
            None
        };

        Self::new(backend, config.clone(), keywords, cache, cache_ttl)
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn max_batch_size(&self) -> usize {
        self.config.max_batch_size.max(1)
    }

    /// Classify entries with one request. Always returns `entries.len()` labels
    /// unless the provider rate-limited the call, which is surfaced as an error so
    /// the caller can fall back to the per-entry path.
    pub async fn classify_batch(
        &self,
        entries: &[LogEntry],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Label>, LlmError> {
        let n = entries.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        if is_cancelled(cancel) {
            tracing::info!("Batch cancelled before LLM request ({} entries)", n);
            return Ok(vec![Label::Cancelled; n]);
        }

        let Some(backend) = &self.backend else {
            return Ok(vec![Label::Unclassified; n]);
        };

        let key = CacheKey::new("classify_batch", &(&self.config.model, entries));
        let policy = CachePolicy::persistent(self.cache_ttl);

        // Only parsed responses are memoized; failures and cancellations are retried next time
        let outcome = self
            .cache
            .try_memoize_async(&key, policy, async {
                tracing::debug!("Batch classifying {} log messages using LLM", n);
                let request = prompt::batch_request(entries, &self.config);
                let response = backend.complete(&request).await?;

                if is_cancelled(cancel) {
                    return Err(LlmError::Cancelled);
                }
                tracing::debug!("Raw LLM batch response: {}", response);
                Ok::<_, LlmError>(self.parser.parse_batch(&response, entries))
            })
            .await;

        match outcome {
            Ok(labels) => Ok(labels),
            Err(LlmError::Cancelled) => {
                tracing::info!("Batch cancelled during LLM request, discarding response");
                Ok(vec![Label::Cancelled; n])
            }
            Err(e) if e.is_rate_limit() => {
                tracing::warn!("LLM batch request rate limited: {}", e);
                Err(e)
            }
            Err(e) => {
                tracing::error!("Error in LLM batch classification: {}", e);
                Ok(vec![Label::Unclassified; n])
            }
        }
    }

    /// Classify one entry with the `<category>` prompt, retrying rate-limited calls
    /// with exponential backoff. Never fails: exhausted retries and other errors
    /// give `unclassified`.
    pub async fn classify_single(
        &self,
        entry: &LogEntry,
        cancel: Option<&CancellationToken>,
    ) -> Label {
        if entry.message.trim().is_empty() {
            return Label::Unclassified;
        }
        let Some(backend) = &self.backend else {
            return Label::Unclassified;
        };

        let key = CacheKey::new("classify_single", &(&self.config.model, entry));
        let policy = CachePolicy::persistent(self.cache_ttl);
        if let Some(label) = self.cache.lookup::<Label>(&key, policy) {
            return label;
        }

        let request = prompt::single_request(entry, &self.config);
        let attempts = self.config.max_retries.max(1);

        for attempt in 0..attempts {
            if is_cancelled(cancel) {
                return Label::Cancelled;
            }

            match backend.complete(&request).await {
                Ok(response) => {
                    if is_cancelled(cancel) {
                        return Label::Cancelled;
                    }
                    let label = self.parser.parse_single(&response).unwrap_or_else(|| {
                        tracing::warn!("Could not extract classification from LLM response: {}", response);
                        Label::Unclassified
                    });
                    self.cache.store(&key, &label, policy);
                    return label;
                }
                Err(e) if e.is_rate_limit() && attempt + 1 < attempts => {
                    let delay = retry_delay(&self.config, attempt, &mut rand::thread_rng());
                    tracing::warn!(
                        "Rate limit hit, retrying in {:.2}s (attempt {}/{})",
                        delay.as_secs_f64(),
                        attempt + 1,
                        attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_rate_limit() => {
                    tracing::error!(
                        "Rate limit exceeded after {} attempts, falling back to unclassified",
                        attempts
                    );
                    return Label::Unclassified;
                }
                Err(e) => {
                    tracing::error!("Error in LLM classification: {}", e);
                    return Label::Unclassified;
                }
            }
        }

        Label::Unclassified
    }

    pub fn info(&self) -> LlmInfo {
        LlmInfo {
            enabled: self.config.enabled,
            provider: self.config.provider.clone(),
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            api_key_configured: std::env::var(&self.config.api_key_env)
                .is_ok_and(|k| !k.trim().is_empty()),
            backend: self.backend.as_ref().map(|b| b.name().to_string()),
            max_batch_size: self.max_batch_size(),
            max_retries: self.config.max_retries,
        }
    }
}
