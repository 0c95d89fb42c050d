use std::path::PathBuf;
use thiserror::Error;

use crate::cache::CacheError;
use crate::llm::LlmError;
use crate::model::ModelError;

/// Main error type for logsieve
#[derive(Error, Debug)]
pub enum SieveError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Statistical model errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// LLM backend errors
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Cache storage errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Batch job not registered
    #[error("Batch job not found: {id}")]
    JobNotFound { id: String },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for logsieve operations
pub type Result<T> = std::result::Result<T, SieveError>;
