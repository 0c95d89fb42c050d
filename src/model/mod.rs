/// Statistical text model tier
///
/// The classifier behind the model tier is pluggable:
/// - `TextModel` trait: label set + batched class probabilities
/// - `LinearTextModel`: TF-IDF features scored by a linear layer, loaded from a JSON artifact
/// - `ModelHolder`: lazily loads the artifact once, with retry after a failed load
mod holder;
mod linear;

pub use holder::{ModelHolder, ModelState};
pub use linear::{LinearModelArtifact, LinearTextModel};

use crate::classify::Label;
use ndarray::Array2;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model artifact not found (tried: {tried})")]
    NotFound { tried: String },

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Invalid model artifact: {0}")]
    InvalidArtifact(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Trait for statistical text classifiers
///
/// Implementations must be cheap to share across threads; the holder hands out
/// `Arc<dyn TextModel>` to concurrent batches.
pub trait TextModel: Send + Sync {
    /// Labels in output column order
    fn labels(&self) -> &[Label];

    /// Class probabilities, one row per input text, columns ordered as `labels()`
    fn predict_proba(&self, texts: &[&str]) -> Result<Array2<f32>, ModelError>;

    /// Short description for diagnostics
    fn name(&self) -> &str {
        "text-model"
    }
}
