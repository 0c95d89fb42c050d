// End-to-end classification through all three tiers with a scripted LLM backend
use async_trait::async_trait;
use logsieve::cache::CacheLayer;
use logsieve::classify::{
    HybridClassifier, Label, LegacySourcePolicy, LogEntry, RuleMatcher, StatisticalClassifier,
    Tier,
};
use logsieve::config::LlmConfig;
use logsieve::jobs::JobRegistry;
use logsieve::llm::{ChatRequest, LlmBackend, LlmClassifier, LlmError};
use logsieve::model::{LinearModelArtifact, ModelHolder};
use logsieve::patterns::RuleRegistry;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync>;

struct MockBackend {
    calls: AtomicUsize,
    respond: Responder,
}

impl MockBackend {
    fn new(respond: Responder) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            respond,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(request)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Number of `N. [source] message` lines in a batch prompt
fn prompt_entries(request: &ChatRequest) -> usize {
    request
        .user
        .lines()
        .filter(|line| {
            line.split_once(". [")
                .is_some_and(|(n, _)| n.parse::<usize>().is_ok())
        })
        .count()
}

/// Answers line i with the i-th resolved label, cycling
fn cycling_reply(request: &ChatRequest) -> Result<String, LlmError> {
    let n = prompt_entries(request);
    Ok((1..=n)
        .map(|i| format!("{}. {}", i, Label::CLASSIFICATIONS[(i - 1) % 5]))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn write_artifact(dir: &Path) -> PathBuf {
    let artifact = LinearModelArtifact {
        labels: vec![
            Label::UserAction,
            Label::SecurityAlert,
            Label::SystemNotification,
        ],
        vocabulary: [("onboarding", 0), ("failed login", 1), ("heartbeat", 2)]
            .into_iter()
            .map(|(t, i)| (t.to_string(), i))
            .collect(),
        idf: vec![1.0, 1.0, 1.0],
        weights: vec![
            vec![4.0, -2.0, -2.0],
            vec![-2.0, 4.0, -2.0],
            vec![-2.0, -2.0, 4.0],
        ],
        bias: vec![0.0, 0.0, 0.0],
        max_ngram: 2,
    };

    let path = dir.join("log_classifier.json");
    std::fs::write(&path, serde_json::to_string(&artifact).unwrap()).unwrap();
    path
}

fn build(
    model_path: PathBuf,
    backend: Option<Arc<MockBackend>>,
    llm_config: LlmConfig,
) -> HybridClassifier {
    let cache = Arc::new(CacheLayer::in_memory(1000, Duration::from_secs(300)));
    let registry = Arc::new(RuleRegistry::builtin().unwrap());

    let rules = RuleMatcher::new(
        Arc::clone(&registry),
        Arc::clone(&cache),
        Duration::from_secs(300),
    );
    let model = StatisticalClassifier::new(Arc::new(ModelHolder::new(model_path, None)), 0.5);
    let llm = LlmClassifier::new(
        backend.map(|b| b as Arc<dyn LlmBackend>),
        llm_config,
        registry.keywords.clone(),
        Arc::clone(&cache),
        Duration::from_secs(300),
    );

    HybridClassifier::new(
        rules,
        model,
        llm,
        Arc::new(LegacySourcePolicy::new(["LegacyCRM"])),
        cache,
    )
}

#[tokio::test]
async fn test_each_tier_resolves_its_entries() {
    let dir = TempDir::new().unwrap();
    let backend = MockBackend::new(Box::new(|_: &ChatRequest| {
        Ok("1. workflow_error".to_string())
    }));
    let classifier = build(
        write_artifact(dir.path()),
        Some(Arc::clone(&backend)),
        LlmConfig::default(),
    );

    let entries = vec![
        LogEntry::new("ModernCRM", "User User123 logged in successfully"),
        LogEntry::new("ModernHR", "Employee onboarding workflow triggered"),
        LogEntry::new("BillingSystem", "Multiple failed login attempts detected"),
        LogEntry::new(
            "LegacyCRM",
            "Case escalation for ticket 7324 failed because the assigned support agent is no longer active",
        ),
    ];

    let outcome = classifier.classify(&entries, None).await.unwrap();

    assert_eq!(
        outcome.labels(),
        vec![
            Label::UserAction,
            Label::UserAction,
            Label::SecurityAlert,
            Label::WorkflowError
        ]
    );
    let tiers: Vec<_> = outcome.results.iter().map(|r| r.tier).collect();
    assert_eq!(
        tiers,
        vec![
            Some(Tier::Regex),
            Some(Tier::Model),
            Some(Tier::Model),
            Some(Tier::Llm)
        ]
    );

    assert_eq!(outcome.results[0].confidence, Some(1.0));
    assert!(outcome.results[1].confidence.unwrap() > 0.9);
    assert_eq!(outcome.results[3].confidence, None);

    assert_eq!(outcome.stats.total, 4);
    assert_eq!(outcome.stats.regex_count, 1);
    assert_eq!(outcome.stats.model_count, 2);
    assert_eq!(outcome.stats.llm_count, 1);
    assert_eq!(outcome.stats.unclassified_count, 0);
    assert!(outcome.stats.is_consistent());
    assert!(!outcome.cancelled);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_rule_resolved_batch_never_calls_llm() {
    let dir = TempDir::new().unwrap();
    let backend = MockBackend::new(Box::new(cycling_reply));
    let classifier = build(
        write_artifact(dir.path()),
        Some(Arc::clone(&backend)),
        LlmConfig::default(),
    );

    let entries = vec![
        LogEntry::new("LegacyCRM", "Backup completed successfully."),
        LogEntry::new("ModernHR", "API v1 is deprecated, use v2"),
        LogEntry::new("AnalyticsEngine", "Database error while loading report"),
    ];
    let outcome = classifier.classify(&entries, None).await.unwrap();

    assert_eq!(outcome.stats.regex_count, 3);
    assert_eq!(backend.calls(), 0);
    assert_eq!(outcome.timings.llm_batches, 0);
    assert_eq!(outcome.timings.llm_ms, 0);
}

#[tokio::test]
async fn test_llm_phase_time_is_reported_per_batch() {
    let dir = TempDir::new().unwrap();
    let backend = MockBackend::new(Box::new(|request: &ChatRequest| {
        std::thread::sleep(Duration::from_millis(30));
        cycling_reply(request)
    }));
    let config = LlmConfig {
        max_batch_size: 2,
        ..LlmConfig::default()
    };
    let classifier = build(write_artifact(dir.path()), Some(Arc::clone(&backend)), config);

    let entries: Vec<LogEntry> = (0..4)
        .map(|i| LogEntry::new("LegacyCRM", format!("Legacy record {} needs review", i)))
        .collect();
    let outcome = classifier.classify(&entries, None).await.unwrap();

    let timings = &outcome.timings;
    assert_eq!(timings.llm_batches, 2);
    assert!(timings.llm_ms >= 60, "llm_ms = {}", timings.llm_ms);
    assert!(timings.slowest_llm_batch_ms >= 30);
    assert!(timings.slowest_llm_batch_ms <= timings.llm_ms);
    assert!(outcome.processing_time_ms >= timings.llm_ms);
}

#[tokio::test]
async fn test_llm_queue_is_chunked_and_order_preserved() {
    let dir = TempDir::new().unwrap();
    let backend = MockBackend::new(Box::new(cycling_reply));
    let config = LlmConfig {
        max_batch_size: 4,
        ..LlmConfig::default()
    };
    let classifier = build(write_artifact(dir.path()), Some(Arc::clone(&backend)), config);

    let entries: Vec<LogEntry> = (0..10)
        .map(|i| LogEntry::new("LegacyCRM", format!("Legacy record {} needs review", i)))
        .collect();
    let outcome = classifier.classify(&entries, None).await.unwrap();

    assert_eq!(backend.calls(), 3);
    assert_eq!(outcome.results.len(), 10);
    for (j, result) in outcome.results.iter().enumerate() {
        assert_eq!(result.label, Label::CLASSIFICATIONS[(j % 4) % 5], "entry {}", j);
        assert_eq!(result.tier, Some(Tier::Llm));
    }
    assert_eq!(outcome.stats.llm_count, 10);
}

#[tokio::test]
async fn test_rate_limited_batch_falls_back_to_single_calls() {
    let dir = TempDir::new().unwrap();
    let backend = MockBackend::new(Box::new(|request: &ChatRequest| {
        if request.system.is_some() {
            Err(LlmError::RateLimited("Too many requests".to_string()))
        } else {
            Ok("<category>Workflow Error</category>".to_string())
        }
    }));
    let classifier = build(
        write_artifact(dir.path()),
        Some(Arc::clone(&backend)),
        LlmConfig::default(),
    );

    let entries = vec![
        LogEntry::new("LegacyCRM", "Case 1 escalation stalled"),
        LogEntry::new("LegacyCRM", "Case 2 escalation stalled"),
    ];
    let outcome = classifier.classify(&entries, None).await.unwrap();

    assert_eq!(outcome.labels(), vec![Label::WorkflowError; 2]);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_llm_batches_are_cached() {
    let dir = TempDir::new().unwrap();
    let backend = MockBackend::new(Box::new(cycling_reply));
    let classifier = build(
        write_artifact(dir.path()),
        Some(Arc::clone(&backend)),
        LlmConfig::default(),
    );

    let entries = vec![
        LogEntry::new("LegacyCRM", "Legacy record A needs review"),
        LogEntry::new("LegacyCRM", "Legacy record B needs review"),
    ];
    let first = classifier.classify(&entries, None).await.unwrap();
    let second = classifier.classify(&entries, None).await.unwrap();

    assert_eq!(first.labels(), second.labels());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_cancelled_job_keeps_rule_results() {
    let dir = TempDir::new().unwrap();
    let backend = MockBackend::new(Box::new(cycling_reply));
    let classifier = build(
        write_artifact(dir.path()),
        Some(Arc::clone(&backend)),
        LlmConfig::default(),
    );
    let registry = JobRegistry::new();

    let job = registry.create(vec![
        LogEntry::new("ModernCRM", "Backup completed successfully."),
        LogEntry::new("ModernHR", "Employee onboarding workflow triggered"),
        LogEntry::new("LegacyCRM", "Case escalation for ticket 7324 failed"),
    ]);
    assert!(registry.cancel(&job.id));
    assert!(!registry.cancel(&job.id));

    let outcome = classifier.classify_job(&job).await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(
        outcome.labels(),
        vec![Label::SystemNotification, Label::Cancelled, Label::Cancelled]
    );
    assert_eq!(outcome.stats.cancelled, 2);
    assert_eq!(outcome.stats.unclassified_count, 2);
    assert!(outcome.stats.is_consistent());
    assert_eq!(backend.calls(), 0);

    assert!(registry.cleanup(&job.id).is_some());
    assert!(registry.active_jobs().is_empty());
}

#[tokio::test]
async fn test_missing_model_and_llm_degrade_to_unclassified() {
    let classifier = build(
        PathBuf::from("/nonexistent/log_classifier.json"),
        None,
        LlmConfig::default(),
    );

    let entries = vec![
        LogEntry::new("ModernCRM", "User User123 logged in successfully"),
        LogEntry::new("ModernHR", "Employee onboarding workflow triggered"),
        LogEntry::new("LegacyCRM", "Case escalation for ticket 7324 failed"),
    ];
    let outcome = classifier.classify(&entries, None).await.unwrap();

    assert_eq!(
        outcome.labels(),
        vec![Label::UserAction, Label::Unclassified, Label::Unclassified]
    );
    assert_eq!(outcome.results[1].tier, None);
    assert!(outcome.stats.is_consistent());
}

#[tokio::test]
async fn test_empty_messages_skip_every_tier() {
    let dir = TempDir::new().unwrap();
    let backend = MockBackend::new(Box::new(cycling_reply));
    let classifier = build(
        write_artifact(dir.path()),
        Some(Arc::clone(&backend)),
        LlmConfig::default(),
    );

    let entries = vec![LogEntry::new("ModernHR", ""), LogEntry::new("LegacyCRM", "  ")];
    let outcome = classifier.classify(&entries, None).await.unwrap();

    assert_eq!(outcome.labels(), vec![Label::Unclassified; 2]);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_onboarding_and_failed_login_resolve_without_llm() {
    let dir = TempDir::new().unwrap();
    let backend = MockBackend::new(Box::new(cycling_reply));
    let classifier = build(
        write_artifact(dir.path()),
        Some(Arc::clone(&backend)),
        LlmConfig::default(),
    );

    let entries = vec![
        LogEntry::new("ModernHR", "Employee onboarding workflow triggered"),
        LogEntry::new("SecuritySystem", "Multiple failed login attempts detected"),
    ];
    let outcome = classifier.classify(&entries, None).await.unwrap();

    assert_eq!(
        outcome.labels(),
        vec![Label::UserAction, Label::SecurityAlert]
    );
    assert!(outcome.stats.regex_count + outcome.stats.model_count >= 1);
    assert_eq!(outcome.stats.llm_count, 0);
    assert_eq!(backend.calls(), 0);
}
