//! logsieve - Hybrid log classification cascade
//!
//! Classifies `(source, message)` log entries into a closed label set using the
//! cheapest tier that can resolve each one: compiled regex rules, a statistical
//! text model gated by confidence, and finally a batched LLM call. Results keep
//! input order and come with per-tier statistics.

pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod model;
pub mod patterns;

pub use classify::{BatchOutcome, ClassificationResult, HybridClassifier, Label, LogEntry};
pub use error::{Result, SieveError};
