// Lazily loaded, process-shared model handle
//
// Loading happens under the write lock, so at most one caller loads at a time.
// Once loaded, callers only take the read lock. A failed load is remembered only for
// reporting; the next call tries again.

use super::{LinearTextModel, ModelError, TextModel};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Loader = dyn Fn(&Path) -> Result<Arc<dyn TextModel>, ModelError> + Send + Sync;

enum LoadState {
    NotAttempted,
    Loaded {
        model: Arc<dyn TextModel>,
        path: Option<PathBuf>,
    },
    LoadFailed {
        reason: String,
        attempts: u32,
    },
}

/// Public view of the holder state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelState {
    NotAttempted,
    Loaded { source: String },
    LoadFailed { reason: String, attempts: u32 },
}

pub struct ModelHolder {
    primary: PathBuf,
    fallback: Option<PathBuf>,
    loader: Box<Loader>,
    state: RwLock<LoadState>,
}

impl ModelHolder {
    /// Holder that loads a `LinearTextModel` from `primary`, then `fallback`
    pub fn new(primary: PathBuf, fallback: Option<PathBuf>) -> Self {
        Self::with_loader(primary, fallback, |path| {
            Ok(Arc::new(LinearTextModel::load(path)?) as Arc<dyn TextModel>)
        })
    }

    /// Holder with a custom artifact loader
    pub fn with_loader<F>(primary: PathBuf, fallback: Option<PathBuf>, loader: F) -> Self
    where
        F: Fn(&Path) -> Result<Arc<dyn TextModel>, ModelError> + Send + Sync + 'static,
    {
        Self {
            primary,
            fallback,
            loader: Box::new(loader),
            state: RwLock::new(LoadState::NotAttempted),
        }
    }

    /// Holder around an already constructed model
    pub fn preloaded(model: Arc<dyn TextModel>) -> Self {
        Self {
            primary: PathBuf::new(),
            fallback: None,
            loader: Box::new(|path| {
                Err(ModelError::NotFound {
                    tried: path.display().to_string(),
                })
            }),
            state: RwLock::new(LoadState::Loaded { model, path: None }),
        }
    }

    /// Return the model, loading it on first use. `None` while no artifact can be loaded.
    pub fn get(&self) -> Option<Arc<dyn TextModel>> {
        if let LoadState::Loaded { model, .. } = &*self.state.read() {
            return Some(Arc::clone(model));
        }

        let mut state = self.state.write();
        // Another caller may have finished loading while this one waited
        let previous_attempts = match &*state {
            LoadState::Loaded { model, .. } => return Some(Arc::clone(model)),
            LoadState::NotAttempted => 0,
            LoadState::LoadFailed { attempts, .. } => *attempts,
        };

        match self.load() {
            Ok((model, path)) => {
                tracing::info!("Loaded statistical model from {}", path.display());
                *state = LoadState::Loaded {
                    model: Arc::clone(&model),
                    path: Some(path),
                };
                Some(model)
            }
            Err(e) => {
                if previous_attempts == 0 {
                    tracing::warn!("Statistical model unavailable, model tier disabled: {}", e);
                } else {
                    tracing::debug!("Model load retry {} failed: {}", previous_attempts + 1, e);
                }
                *state = LoadState::LoadFailed {
                    reason: e.to_string(),
                    attempts: previous_attempts + 1,
                };
                None
            }
        }
    }

    fn load(&self) -> Result<(Arc<dyn TextModel>, PathBuf), ModelError> {
        let candidates: Vec<&Path> = std::iter::once(self.primary.as_path())
            .chain(self.fallback.as_deref())
            .collect();

        for path in &candidates {
            if path.exists() {
                return (self.loader)(path).map(|model| (model, path.to_path_buf()));
            }
            tracing::debug!("Model artifact not present at {}", path.display());
        }

        Err(ModelError::NotFound {
            tried: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    pub fn state(&self) -> ModelState {
        match &*self.state.read() {
            LoadState::NotAttempted => ModelState::NotAttempted,
            LoadState::Loaded { model, path } => ModelState::Loaded {
                source: path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| model.name().to_string()),
            },
            LoadState::LoadFailed { reason, attempts } => ModelState::LoadFailed {
                reason: reason.clone(),
                attempts: *attempts,
            },
        }
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary
    }

    pub fn fallback_path(&self) -> Option<&Path> {
        self.fallback.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Label;
    use crate::model::LinearModelArtifact;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write_artifact(path: &Path) {
        let artifact = LinearModelArtifact {
            labels: vec![Label::UserAction, Label::WorkflowError],
            vocabulary: [("hello".to_string(), 0)].into_iter().collect(),
            idf: vec![1.0],
            weights: vec![vec![1.0], vec![-1.0]],
            bias: vec![0.0, 0.0],
            max_ngram: 1,
        };
        std::fs::write(path, serde_json::to_string(&artifact).unwrap()).unwrap();
    }

    #[test]
    fn test_missing_artifact_fails_softly() {
        let temp_dir = TempDir::new().unwrap();
        let holder = ModelHolder::new(temp_dir.path().join("missing.json"), None);

        assert!(holder.get().is_none());
        assert!(matches!(
            holder.state(),
            ModelState::LoadFailed { attempts: 1, .. }
        ));
    }

    #[test]
    fn test_fallback_path_used() {
        let temp_dir = TempDir::new().unwrap();
        let fallback = temp_dir.path().join("fallback.json");
        write_artifact(&fallback);

        let holder = ModelHolder::new(temp_dir.path().join("primary.json"), Some(fallback));
        assert!(holder.get().is_some());
        match holder.state() {
            ModelState::Loaded { source } => assert!(source.ends_with("fallback.json")),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_retry_after_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("late.json");
        let holder = ModelHolder::new(path.clone(), None);

        assert!(holder.get().is_none());
        write_artifact(&path);
        assert!(holder.get().is_some());
        assert!(matches!(holder.state(), ModelState::Loaded { .. }));
    }

    #[test]
    fn test_loads_only_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.json");
        write_artifact(&path);

        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let holder = ModelHolder::with_loader(path, None, move |p| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(LinearTextModel::load(p)?) as Arc<dyn TextModel>)
        });

        for _ in 0..5 {
            assert!(holder.get().is_some());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.json");
        write_artifact(&path);

        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let holder = ModelHolder::with_loader(path, None, move |p| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Arc::new(LinearTextModel::load(p)?) as Arc<dyn TextModel>)
        });

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| holder.get())).collect();
            for handle in handles {
                let model = handle.join().unwrap();
                assert!(model.is_some());
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(matches!(holder.state(), ModelState::Loaded { .. }));
    }
}
