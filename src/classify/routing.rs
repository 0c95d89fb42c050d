// Source routing: which sources skip the model tier
use crate::config::RoutingConfig;
use std::collections::HashSet;

/// Decides whether a source's unresolved messages go straight to the LLM
pub trait SourceRoutingPolicy: Send + Sync {
    fn requires_direct_llm(&self, source: &str) -> bool;
}

/// Exact-match list of legacy sources whose message formats the model handles poorly
#[derive(Debug, Clone, Default)]
pub struct LegacySourcePolicy {
    sources: HashSet<String>,
}

impl LegacySourcePolicy {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(config.legacy_sources.iter().cloned())
    }
}

impl SourceRoutingPolicy for LegacySourcePolicy {
    fn requires_direct_llm(&self, source: &str) -> bool {
        self.sources.contains(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_sources_routed() {
        let policy = LegacySourcePolicy::from_config(&RoutingConfig::default());
        assert!(policy.requires_direct_llm("LegacyCRM"));
        assert!(!policy.requires_direct_llm("ModernCRM"));
        assert!(!policy.requires_direct_llm("legacycrm"));
    }
}
