use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{Result, SieveError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_model(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_cache(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SieveError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_model(config: &Config, errors: &mut Vec<ValidationError>) {
        let threshold = config.model.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(ValidationError::new(
                "model.confidence_threshold",
                format!("Threshold must be between 0.0 and 1.0, got {}", threshold),
            ));
        }

        if config.model.artifact_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "model.artifact_path",
                "Artifact path cannot be empty",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let llm = &config.llm;

        // A missing key is not an error: the LLM tier degrades to unclassified
        if llm.enabled && std::env::var(&llm.api_key_env).map_or(true, |k| k.is_empty()) {
            tracing::warn!(
                "Environment variable {} is not set; LLM tier will return unclassified",
                llm.api_key_env
            );
        }

        if !(0.0..=2.0).contains(&llm.temperature) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", llm.temperature),
            ));
        }

        let valid_providers = ["groq", "openai"];
        if !valid_providers.contains(&llm.provider.as_str()) {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, llm.provider
                ),
            ));
        }

        if llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model name cannot be empty"));
        }

        if llm.max_batch_size == 0 {
            errors.push(ValidationError::new(
                "llm.max_batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if llm.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "llm.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }

        if llm.backoff_base_ms > llm.backoff_max_ms {
            errors.push(ValidationError::new(
                "llm.backoff_base_ms",
                format!(
                    "Backoff base ({}ms) exceeds backoff max ({}ms)",
                    llm.backoff_base_ms, llm.backoff_max_ms
                ),
            ));
        }

        let tag_ok = !llm.reasoning_tag.is_empty()
            && llm
                .reasoning_tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !tag_ok {
            errors.push(ValidationError::new(
                "llm.reasoning_tag",
                format!("Invalid reasoning tag: '{}'", llm.reasoning_tag),
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.cache.max_entries == 0 {
            errors.push(ValidationError::new(
                "cache.max_entries",
                "Cache size must be greater than 0",
            ));
        }

        if config.cache.enabled && config.cache.llm_ttl_secs == 0 {
            errors.push(ValidationError::new(
                "cache.llm_ttl_secs",
                "TTL must be greater than 0 when caching is enabled",
            ));
        }
    }
}
