// Rule tier: first matching compiled rule wins
use super::Label;
use crate::cache::{CacheKey, CacheLayer, CachePolicy};
use crate::patterns::RuleRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Regex rule matcher with memoized results
pub struct RuleMatcher {
    registry: Arc<RuleRegistry>,
    cache: Arc<CacheLayer>,
    ttl: Duration,
}

impl RuleMatcher {
    pub fn new(registry: Arc<RuleRegistry>, cache: Arc<CacheLayer>, ttl: Duration) -> Self {
        Self {
            registry,
            cache,
            ttl,
        }
    }

    /// Label of the first rule matching `message`, or `unclassified`.
    ///
    /// `source` is only used for logging; rules never look at it. Empty messages
    /// return `unclassified` without touching the rules or the cache.
    pub fn match_message(&self, source: &str, message: &str) -> Label {
        if message.trim().is_empty() {
            return Label::Unclassified;
        }

        let key = CacheKey::new("rule_match", message);
        self.cache
            .memoize(&key, CachePolicy::memory(self.ttl), || {
                self.match_uncached(source, message)
            })
    }

    fn match_uncached(&self, source: &str, message: &str) -> Label {
        match self.registry.first_match(message) {
            Some(rule) => {
                tracing::debug!(source, rule = %rule.name, label = %rule.label, "Rule matched");
                rule.label
            }
            None => Label::Unclassified,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.registry.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> RuleMatcher {
        RuleMatcher::new(
            Arc::new(RuleRegistry::builtin().unwrap()),
            Arc::new(CacheLayer::in_memory(100, Duration::from_secs(60))),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_builtin_rules_resolve_templated_lines() {
        let m = matcher();
        assert_eq!(
            m.match_message("BillingSystem", "Backup completed successfully."),
            Label::SystemNotification
        );
        assert_eq!(
            m.match_message("ModernCRM", "User User123 logged in successfully"),
            Label::UserAction
        );
        assert_eq!(
            m.match_message("AnalyticsEngine", "Database error while loading report"),
            Label::WorkflowError
        );
        assert_eq!(
            m.match_message("ModernHR", "API v1 is deprecated, use v2"),
            Label::DeprecationWarning
        );
    }

    #[test]
    fn test_http_rule_respects_exclusion() {
        let m = matcher();
        assert_eq!(
            m.match_message("WebServer", "GET /v2/servers/detail HTTP/1.1 status: 200"),
            Label::SystemNotification
        );
        assert_ne!(
            m.match_message("WebServer", "GET /v2/servers failed with timeout 504"),
            Label::SystemNotification
        );
    }

    #[test]
    fn test_empty_message_unclassified() {
        let m = matcher();
        assert_eq!(m.match_message("App", ""), Label::Unclassified);
        assert_eq!(m.match_message("App", "   "), Label::Unclassified);
    }

    #[test]
    fn test_match_is_idempotent() {
        let m = matcher();
        let first = m.match_message("App", "Multiple failed login attempts detected");
        let second = m.match_message("App", "Multiple failed login attempts detected");
        assert_eq!(first, second);
        assert_eq!(first, Label::Unclassified);
    }
}
