//! Configuration management for logsieve
//!
//! Configuration is a TOML file with one section per tier plus cache settings.
//! Values can be overridden per profile and through `LOGSIEVE_SECTION__KEY`
//! environment variables; the result is checked by [`ConfigValidator`].

use crate::error::{Result, SieveError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Default configuration shipped with the binary
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../config-templates/config.toml");

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub rules: RulesSection,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Rule tier: where the rules file lives (built-in rules when unset or missing)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,
}

/// Statistical model tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub artifact_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_artifact_path: Option<PathBuf>,
    /// Predictions whose top probability is below this value escalate to the LLM
    pub confidence_threshold: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from("models/log_classifier.json"),
            fallback_artifact_path: Some(PathBuf::from("~/.logsieve/models/log_classifier.json")),
            confidence_threshold: 0.5,
        }
    }
}

/// Source routing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Sources whose messages skip the model tier and go straight to the LLM
    pub legacy_sources: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            legacy_sources: vec!["LegacyCRM".to_string()],
        }
    }
}

/// LLM tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    /// "groq" or "openai"
    pub provider: String,
    /// Overrides the provider's default endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    /// Token budget for a batch is `base_max_tokens + max_tokens_per_entry * n`
    pub base_max_tokens: u32,
    pub max_tokens_per_entry: u32,
    pub single_max_tokens: u32,
    /// Entries per LLM request; larger batches are split
    pub max_batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter_ms: u64,
    /// Tag wrapping reasoning output, e.g. `think` for `<think>...</think>`
    pub reasoning_tag: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "groq".to_string(),
            base_url: None,
            api_key_env: "GROQ_API_KEY".to_string(),
            model: "llama-3.1-70b-versatile".to_string(),
            temperature: 0.1,
            base_max_tokens: 40,
            max_tokens_per_entry: 8,
            single_max_tokens: 100,
            max_batch_size: 25,
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            backoff_jitter_ms: 1000,
            reasoning_tag: "think".to_string(),
        }
    }
}

/// Memoization cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub default_ttl_secs: u64,
    pub rule_ttl_secs: u64,
    pub llm_ttl_secs: u64,
    /// Directory for the persistent store; memory only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_dir: Option<PathBuf>,
    /// Persistent entries at least this many bytes are zstd-compressed
    pub compression_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_ttl_secs: 1800,
            rule_ttl_secs: 3600,
            llm_ttl_secs: 7200,
            persistent_dir: None,
            compression_threshold: 1024,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_sources: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SieveError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| SieveError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| SieveError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| SieveError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(threshold) = overrides.confidence_threshold {
            self.model.confidence_threshold = threshold;
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = enabled;
        }
        if let Some(sources) = overrides.legacy_sources {
            self.routing.legacy_sources = sources;
        }

        tracing::info!("Applied configuration profile: {}", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LOGSIEVE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LOGSIEVE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "LLM__ENABLED" => self.llm.enabled = parse_env(path, value)?,
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__PROVIDER" => self.llm.provider = value.to_string(),
            "LLM__BASE_URL" => self.llm.base_url = Some(value.to_string()),
            "MODEL__CONFIDENCE_THRESHOLD" => {
                self.model.confidence_threshold = parse_env(path, value)?
            }
            "MODEL__ARTIFACT_PATH" => self.model.artifact_path = PathBuf::from(value),
            "CACHE__ENABLED" => self.cache.enabled = parse_env(path, value)?,
            "CACHE__PERSISTENT_DIR" => self.cache.persistent_dir = Some(PathBuf::from(value)),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Resolve `~/` in every configured path
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(rules_file) = &self.rules.rules_file {
            self.rules.rules_file = Some(expand_path(rules_file)?);
        }
        self.model.artifact_path = expand_path(&self.model.artifact_path)?;
        if let Some(fallback) = &self.model.fallback_artifact_path {
            self.model.fallback_artifact_path = Some(expand_path(fallback)?);
        }
        if let Some(dir) = &self.cache.persistent_dir {
            self.cache.persistent_dir = Some(expand_path(dir)?);
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SieveError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("logsieve").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| SieveError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".logsieve"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            rules: RulesSection::default(),
            model: ModelConfig::default(),
            routing: RoutingConfig::default(),
            llm: LlmConfig::default(),
            cache: CacheConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| SieveError::InvalidConfigValue {
        path: path.to_string(),
        message: format!(
            "Cannot parse '{}' as {}",
            value,
            std::any::type_name::<T>()
        ),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| SieveError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SieveError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config.meta.schema_version, SCHEMA_VERSION);
        assert_eq!(config.routing.legacy_sources, vec!["LegacyCRM"]);
        assert!(config.profiles.contains_key("offline"));
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [_meta]
            schema_version = "1.0.0"

            [model]
            confidence_threshold = 0.7
            "#,
        )
        .unwrap();

        assert_eq!(config.model.confidence_threshold, 0.7);
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.cache.max_entries, 1000);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.llm.model = "test-model".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.llm.model, "test-model");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/logsieve.toml")).unwrap_err();
        assert!(matches!(err, SieveError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_apply_profile() {
        let mut config: Config = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        config.apply_profile("offline").unwrap();
        assert!(!config.llm.enabled);

        assert!(config.apply_profile("nope").is_err());
    }

    #[test]
    fn test_env_value_parsing() {
        let mut config = Config::default();
        config
            .set_value_from_env("MODEL__CONFIDENCE_THRESHOLD", "0.8")
            .unwrap();
        assert_eq!(config.model.confidence_threshold, 0.8);

        config.set_value_from_env("LLM__ENABLED", "false").unwrap();
        assert!(!config.llm.enabled);

        assert!(config.set_value_from_env("LLM__ENABLED", "maybe").is_err());
    }

    #[test]
    fn test_expand_path() {
        let expanded = expand_path(Path::new("/abs/path")).unwrap();
        assert_eq!(expanded, PathBuf::from("/abs/path"));

        if let Some(home) = dirs::home_dir() {
            let expanded = expand_path(Path::new("~/models/m.json")).unwrap();
            assert_eq!(expanded, home.join("models/m.json"));
        }
    }
}
