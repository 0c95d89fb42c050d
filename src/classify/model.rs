// Model tier adapter: confidence-gated predictions that never fail
use super::Label;
use crate::model::{ModelHolder, ModelState, TextModel};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Gated model output for one message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrediction {
    /// Top label, or `unclassified` when gated or unavailable
    pub label: Label,
    /// Top class probability when the model produced one
    pub confidence: Option<f32>,
}

impl ModelPrediction {
    fn unavailable() -> Self {
        Self {
            label: Label::Unclassified,
            confidence: None,
        }
    }
}

/// Model tier status report
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub state: ModelState,
    pub model_name: Option<String>,
    pub labels: Vec<Label>,
    pub artifact_path: PathBuf,
    pub fallback_artifact_path: Option<PathBuf>,
    pub confidence_threshold: f32,
}

pub struct StatisticalClassifier {
    holder: Arc<ModelHolder>,
    threshold: f32,
}

impl StatisticalClassifier {
    pub fn new(holder: Arc<ModelHolder>, threshold: f32) -> Self {
        Self { holder, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn predict(&self, message: &str) -> Label {
        self.predict_scored(&[message])
            .first()
            .map_or(Label::Unclassified, |p| p.label)
    }

    pub fn predict_batch(&self, messages: &[&str]) -> Vec<Label> {
        self.predict_scored(messages)
            .into_iter()
            .map(|p| p.label)
            .collect()
    }

    /// Top-class probability, 0.0 when no model is available
    pub fn confidence(&self, message: &str) -> f32 {
        self.predict_scored(&[message])
            .first()
            .and_then(|p| p.confidence)
            .unwrap_or(0.0)
    }

    /// One vectorized call for all messages; always returns `messages.len()` predictions
    pub fn predict_scored(&self, messages: &[&str]) -> Vec<ModelPrediction> {
        let mut predictions = vec![ModelPrediction::unavailable(); messages.len()];
        if messages.is_empty() {
            return predictions;
        }

        let Some(model) = self.holder.get() else {
            return predictions;
        };

        // Blank messages never reach the model
        let (indices, texts): (Vec<usize>, Vec<&str>) = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.trim().is_empty())
            .map(|(i, m)| (i, *m))
            .unzip();
        if texts.is_empty() {
            return predictions;
        }

        match self.score(model.as_ref(), &texts) {
            Ok(scored) => {
                for (i, prediction) in indices.into_iter().zip(scored) {
                    predictions[i] = prediction;
                }
            }
            Err(e) => {
                tracing::error!("Model inference failed for {} messages: {}", texts.len(), e);
            }
        }

        predictions
    }

    fn score(
        &self,
        model: &dyn TextModel,
        texts: &[&str],
    ) -> Result<Vec<ModelPrediction>, crate::model::ModelError> {
        let probabilities = model.predict_proba(texts)?;
        let labels = model.labels();

        if probabilities.nrows() != texts.len() || probabilities.ncols() != labels.len() {
            return Err(crate::model::ModelError::Inference(format!(
                "expected {}x{} probabilities, got {}x{}",
                texts.len(),
                labels.len(),
                probabilities.nrows(),
                probabilities.ncols()
            )));
        }

        Ok(probabilities
            .rows()
            .into_iter()
            .map(|row| {
                let (best, max) = row
                    .iter()
                    .copied()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |acc, (i, p)| {
                        if p > acc.1 {
                            (i, p)
                        } else {
                            acc
                        }
                    });

                let label = if max < self.threshold {
                    Label::Unclassified
                } else {
                    labels[best]
                };
                ModelPrediction {
                    label,
                    confidence: Some(max),
                }
            })
            .collect())
    }

    /// Status report; attempts the lazy load so the state is current
    pub fn info(&self) -> ModelInfo {
        let model = self.holder.get();

        ModelInfo {
            state: self.holder.state(),
            model_name: model.as_ref().map(|m| m.name().to_string()),
            labels: model.map(|m| m.labels().to_vec()).unwrap_or_default(),
            artifact_path: self.holder.primary_path().to_path_buf(),
            fallback_artifact_path: self.holder.fallback_path().map(|p| p.to_path_buf()),
            confidence_threshold: self.threshold,
        }
    }
}
