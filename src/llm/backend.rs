//! Chat-completion backends
//!
//! The classifier only needs "send a prompt, get text back". Groq and OpenAI share
//! the same chat-completions wire format, so one HTTP backend serves both.

use super::{ChatRequest, LlmError};
use crate::config::LlmConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Trait for LLM completion backends
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Run one chat completion and return the assistant text
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;

    /// Backend name for diagnostics
    fn name(&self) -> &str;
}

/// OpenAI-compatible chat-completions client (OpenAI, Groq)
pub struct OpenAiCompatBackend {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    name: String,
}

impl OpenAiCompatBackend {
    pub fn new(
        provider: &str,
        base_url: Option<&str>,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let url = match (base_url, provider) {
            (Some(url), _) => url.to_string(),
            (None, "groq") => GROQ_URL.to_string(),
            (None, "openai") => OPENAI_URL.to_string(),
            (None, other) => return Err(LlmError::UnknownProvider(other.to_string())),
        };

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            api_key,
            name: format!("{}:{}", provider, model),
            model,
        })
    }

    /// Build from configuration, reading the API key from the configured variable
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::MissingCredentials(config.api_key_env.clone()))?;

        Self::new(
            &config.provider,
            config.base_url.as_deref(),
            api_key,
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.user}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        tracing::debug!("Requesting completion from {} with model {}", self.url, self.model);

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: serde_json::Value = response.json().await?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .unwrap_or_default();

        // A blank answer is still an answer; the parser recovers from message keywords
        if content.is_empty() {
            tracing::warn!("LLM returned an empty completion");
        }
        Ok(content.to_string())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
