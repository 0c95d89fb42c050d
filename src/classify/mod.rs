// Hybrid classification cascade for log entries
//
// Rules: compiled regex patterns, free and deterministic
// Model: vectorized statistical classifier gated by a confidence threshold
// LLM:   batched chat completion for whatever is left
//
// Every entry is resolved by the cheapest tier that can. Output order always
// matches input order.

mod model;
mod routing;
mod rules;
mod types;

pub use model::{ModelInfo, ModelPrediction, StatisticalClassifier};
pub use routing::{LegacySourcePolicy, SourceRoutingPolicy};
pub use rules::RuleMatcher;
pub use types::{
    BatchOutcome, ClassificationResult, Label, LogEntry, PhaseTimings, Tier, TierStatistics,
    SLOW_LLM_BATCH_MS,
};

use crate::cache::{CacheLayer, CacheStats};
use crate::config::Config;
use crate::error::Result;
use crate::jobs::BatchJob;
use crate::llm::{LlmClassifier, LlmInfo};
use crate::model::ModelHolder;
use crate::patterns::RuleRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Orchestrates the three tiers over a batch of entries
pub struct HybridClassifier {
    rules: RuleMatcher,
    model: StatisticalClassifier,
    llm: LlmClassifier,
    routing: Arc<dyn SourceRoutingPolicy>,
    cache: Arc<CacheLayer>,
}

impl HybridClassifier {
    pub fn new(
        rules: RuleMatcher,
        model: StatisticalClassifier,
        llm: LlmClassifier,
        routing: Arc<dyn SourceRoutingPolicy>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        Self {
            rules,
            model,
            llm,
            routing,
            cache,
        }
    }

    /// Wire every tier from configuration. Paths are expanded here; the model
    /// artifact is loaded lazily on first use.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut config = config.clone();
        config.expand_paths()?;

        let cache = Arc::new(CacheLayer::from_config(&config.cache));
        let registry = Arc::new(RuleRegistry::load_or_builtin(
            config.rules.rules_file.as_deref(),
        )?);
        tracing::debug!("Loaded {} classification rules", registry.rules.len());

        let rules = RuleMatcher::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Duration::from_secs(config.cache.rule_ttl_secs),
        );

        let holder = ModelHolder::new(
            config.model.artifact_path.clone(),
            config.model.fallback_artifact_path.clone(),
        );
        let model =
            StatisticalClassifier::new(Arc::new(holder), config.model.confidence_threshold);

        let llm = LlmClassifier::from_config(
            &config.llm,
            registry.keywords.clone(),
            Arc::clone(&cache),
            Duration::from_secs(config.cache.llm_ttl_secs),
        );

        let routing = Arc::new(LegacySourcePolicy::from_config(&config.routing));

        Ok(Self::new(rules, model, llm, routing, cache))
    }

    /// Classify a batch, returning one result per entry in input order.
    ///
    /// Cancellation is checked after the rule phase, after the model phase and
    /// around each LLM request. Entries still unresolved at that point are
    /// reported as `cancelled`; entries already resolved keep their labels.
    pub async fn classify(
        &self,
        entries: &[LogEntry],
        cancel: Option<&CancellationToken>,
    ) -> Result<BatchOutcome> {
        let start = Instant::now();
        let mut timings = PhaseTimings::default();
        let mut results = vec![ClassificationResult::unclassified(); entries.len()];
        let mut cancelled = false;

        // Rule phase
        let mut model_queue = Vec::new();
        let mut llm_queue = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            if entry.message.trim().is_empty() {
                continue;
            }

            let label = self.rules.match_message(&entry.source, &entry.message);
            if label.is_resolved() {
                results[i] = ClassificationResult::resolved(label, Tier::Regex, Some(1.0));
            } else if self.routing.requires_direct_llm(&entry.source) {
                llm_queue.push(i);
            } else {
                model_queue.push(i);
            }
        }
        tracing::debug!(
            "Rule phase: {} resolved, {} for model, {} routed to LLM",
            entries.len() - model_queue.len() - llm_queue.len(),
            model_queue.len(),
            llm_queue.len()
        );
        timings.rule_ms = elapsed_ms(start);

        if is_cancelled(cancel) {
            mark_cancelled(&mut results, model_queue.iter().chain(&llm_queue));
            return Ok(self.finish(results, true, start, timings));
        }

        // Model phase
        let model_start = Instant::now();
        if !model_queue.is_empty() {
            let messages: Vec<&str> = model_queue
                .iter()
                .map(|&i| entries[i].message.as_str())
                .collect();
            let predictions = self.model.predict_scored(&messages);

            for (&i, prediction) in model_queue.iter().zip(predictions) {
                if prediction.label.is_resolved() {
                    results[i] = ClassificationResult::resolved(
                        prediction.label,
                        Tier::Model,
                        prediction.confidence,
                    );
                } else {
                    llm_queue.push(i);
                }
            }
            llm_queue.sort_unstable();
        }
        timings.model_ms = elapsed_ms(model_start);

        if is_cancelled(cancel) {
            mark_cancelled(&mut results, llm_queue.iter());
            return Ok(self.finish(results, true, start, timings));
        }

        // LLM phase
        let chunks: Vec<&[usize]> = llm_queue.chunks(self.llm.max_batch_size()).collect();
        for (n, chunk) in chunks.iter().enumerate() {
            if is_cancelled(cancel) {
                mark_cancelled(&mut results, chunks[n..].iter().flat_map(|c| c.iter()));
                cancelled = true;
                break;
            }

            let batch_start = Instant::now();
            let batch: Vec<LogEntry> = chunk.iter().map(|&i| entries[i].clone()).collect();
            let labels = match self.llm.classify_batch(&batch, cancel).await {
                Ok(labels) => labels,
                Err(e) => {
                    tracing::warn!(
                        "Batch LLM call failed ({}), classifying {} entries individually",
                        e,
                        batch.len()
                    );
                    let mut labels = Vec::with_capacity(batch.len());
                    for entry in &batch {
                        labels.push(self.llm.classify_single(entry, cancel).await);
                    }
                    labels
                }
            };
            timings.record_llm_batch(elapsed_ms(batch_start));

            for (&i, label) in chunk.iter().zip(labels) {
                results[i] = match label {
                    Label::Cancelled => {
                        cancelled = true;
                        ClassificationResult::cancelled()
                    }
                    label if label.is_resolved() => {
                        ClassificationResult::resolved(label, Tier::Llm, None)
                    }
                    _ => ClassificationResult::unclassified(),
                };
            }
        }

        Ok(self.finish(results, cancelled, start, timings))
    }

    /// Classify a registered job's entries under its cancellation token
    pub async fn classify_job(&self, job: &BatchJob) -> Result<BatchOutcome> {
        tracing::info!("Classifying job {} ({} entries)", job.id, job.entries.len());
        self.classify(&job.entries, Some(job.token())).await
    }

    fn finish(
        &self,
        results: Vec<ClassificationResult>,
        cancelled: bool,
        start: Instant,
        timings: PhaseTimings,
    ) -> BatchOutcome {
        let stats = TierStatistics::from_results(&results);
        debug_assert!(stats.is_consistent());
        stats.log_summary();
        timings.log_summary();
        if cancelled {
            tracing::info!("Batch cancelled: {} entries left unresolved", stats.cancelled);
        }

        BatchOutcome {
            results,
            stats,
            cancelled,
            processing_time_ms: elapsed_ms(start),
            timings,
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        self.model.info()
    }

    pub fn llm_info(&self) -> LlmInfo {
        self.llm.info()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(|t| t.is_cancelled())
}

fn mark_cancelled<'a>(
    results: &mut [ClassificationResult],
    indices: impl Iterator<Item = &'a usize>,
) {
    for &i in indices {
        results[i] = ClassificationResult::cancelled();
    }
}
