//! Linear TF-IDF text classifier
//!
//! The artifact is produced offline and stored as JSON:
//!
//! ```json
//! {
//!   "labels": ["user_action", "security_alert"],
//!   "vocabulary": {"failed": 0, "failed login": 1},
//!   "idf": [1.2, 2.0],
//!   "weights": [[0.0, -1.0], [1.5, 2.0]],
//!   "bias": [0.0, 0.0]
//! }
//! ```
//!
//! Scoring is `softmax(W · l2(tf * idf) + b)` over lowercase word unigrams and
//! bigrams (tokens of two or more alphanumeric characters).

use super::{ModelError, TextModel};
use crate::classify::Label;
use ahash::{HashMap, HashMapExt};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModelArtifact {
    pub labels: Vec<Label>,
    pub vocabulary: std::collections::HashMap<String, usize>,
    pub idf: Vec<f32>,
    /// One row per label, one column per vocabulary term
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default = "default_max_ngram")]
    pub max_ngram: usize,
}

fn default_max_ngram() -> usize {
    2
}

/// Loaded, shape-checked linear model
#[derive(Debug, Clone)]
pub struct LinearTextModel {
    labels: Vec<Label>,
    vocabulary: HashMap<String, usize>,
    idf: Array1<f32>,
    weights: Array2<f32>,
    bias: Array1<f32>,
    max_ngram: usize,
    name: String,
}

impl LinearTextModel {
    /// Load an artifact from disk
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelError::Io {
            source: e,
            context: format!("Failed to read model artifact: {}", path.display()),
        })?;

        let artifact: LinearModelArtifact = serde_json::from_str(&content)
            .map_err(|e| ModelError::InvalidArtifact(format!("{}: {}", path.display(), e)))?;

        let mut model = Self::from_artifact(artifact)?;
        model.name = format!("linear-tfidf:{}", path.display());
        Ok(model)
    }

    /// Build a model from an in-memory artifact, checking all shapes
    pub fn from_artifact(artifact: LinearModelArtifact) -> Result<Self, ModelError> {
        let n_labels = artifact.labels.len();
        let n_terms = artifact.idf.len();

        if n_labels == 0 {
            return Err(ModelError::InvalidArtifact("artifact has no labels".to_string()));
        }
        if artifact.labels.contains(&Label::Cancelled) {
            return Err(ModelError::InvalidArtifact(
                "cancelled is not a model label".to_string(),
            ));
        }
        if artifact.bias.len() != n_labels || artifact.weights.len() != n_labels {
            return Err(ModelError::InvalidArtifact(format!(
                "expected {} weight rows and bias terms, got {} and {}",
                n_labels,
                artifact.weights.len(),
                artifact.bias.len()
            )));
        }
        if let Some(row) = artifact.weights.iter().find(|row| row.len() != n_terms) {
            return Err(ModelError::InvalidArtifact(format!(
                "weight row has {} columns, vocabulary has {} terms",
                row.len(),
                n_terms
            )));
        }
        if let Some((term, idx)) = artifact.vocabulary.iter().find(|(_, idx)| **idx >= n_terms) {
            return Err(ModelError::InvalidArtifact(format!(
                "term '{}' index {} out of range",
                term, idx
            )));
        }

        let flat: Vec<f32> = artifact.weights.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((n_labels, n_terms), flat)
            .map_err(|e| ModelError::InvalidArtifact(e.to_string()))?;

        let mut vocabulary = HashMap::with_capacity(artifact.vocabulary.len());
        vocabulary.extend(artifact.vocabulary);

        Ok(Self {
            labels: artifact.labels,
            vocabulary,
            idf: Array1::from(artifact.idf),
            weights,
            bias: Array1::from(artifact.bias),
            max_ngram: artifact.max_ngram.max(1),
            name: "linear-tfidf".to_string(),
        })
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.chars().count() >= 2)
            .map(str::to_string)
            .collect()
    }

    /// L2-normalized TF-IDF vector for one text
    fn featurize(&self, text: &str) -> Array1<f32> {
        let tokens = Self::tokenize(text);
        let mut features = Array1::<f32>::zeros(self.idf.len());

        for n in 1..=self.max_ngram {
            for window in tokens.windows(n) {
                if let Some(&idx) = self.vocabulary.get(&window.join(" ")) {
                    features[idx] += 1.0;
                }
            }
        }

        features *= &self.idf;
        let norm = features.dot(&features).sqrt();
        if norm > 0.0 {
            features /= norm;
        }
        features
    }
}

impl TextModel for LinearTextModel {
    fn labels(&self) -> &[Label] {
        &self.labels
    }

    fn predict_proba(&self, texts: &[&str]) -> Result<Array2<f32>, ModelError> {
        let mut probabilities = Array2::<f32>::zeros((texts.len(), self.labels.len()));

        for (mut row, text) in probabilities.axis_iter_mut(Axis(0)).zip(texts) {
            let logits = self.weights.dot(&self.featurize(text)) + &self.bias;
            let max = logits.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            let exp = logits.mapv(|v| (v - max).exp());
            let sum = exp.sum();
            if !sum.is_finite() || sum <= 0.0 {
                return Err(ModelError::Inference(format!(
                    "non-finite scores for input: {}",
                    text
                )));
            }
            row.assign(&(exp / sum));
        }

        Ok(probabilities)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> LinearModelArtifact {
        LinearModelArtifact {
            labels: vec![Label::UserAction, Label::SecurityAlert],
            vocabulary: [("onboarding", 0), ("failed login", 1), ("login", 2)]
                .into_iter()
                .map(|(t, i)| (t.to_string(), i))
                .collect(),
            idf: vec![1.0, 1.0, 1.0],
            weights: vec![vec![4.0, -2.0, 0.0], vec![-2.0, 4.0, 1.0]],
            bias: vec![0.0, 0.0],
            max_ngram: 2,
        }
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let model = LinearTextModel::from_artifact(artifact()).unwrap();
        let probs = model
            .predict_proba(&["Employee onboarding started", "Multiple failed login attempts"])
            .unwrap();

        assert_eq!(probs.shape(), &[2, 2]);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        assert!(probs[[0, 0]] > 0.9);
        assert!(probs[[1, 1]] > 0.9);
    }

    #[test]
    fn test_unknown_text_is_uniform() {
        let model = LinearTextModel::from_artifact(artifact()).unwrap();
        let probs = model.predict_proba(&["zzz qqq"]).unwrap();
        assert!((probs[[0, 0]] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut bad = artifact();
        bad.weights[1].pop();
        assert!(matches!(
            LinearTextModel::from_artifact(bad),
            Err(ModelError::InvalidArtifact(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_string(&artifact()).unwrap()).unwrap();

        let model = LinearTextModel::load(&path).unwrap();
        assert_eq!(model.labels(), &[Label::UserAction, Label::SecurityAlert]);
        assert!(model.name().contains("model.json"));
    }
}
