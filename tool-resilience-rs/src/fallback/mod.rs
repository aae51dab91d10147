//! Ordered fallback chain producing a usable answer when the primary path fails.

pub mod guidance;
pub mod query;
pub mod strategies;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::stores::{CacheStore, ConversationStore};

pub use guidance::{
    data_not_found_response, degradation_notice, degraded_answer, explain_error, format_resources,
    progressive_degradation_message, suggest_official_resources, tool_display_name, unavailable_services, ErrorClass,
    ResourceSuggestion,
};
pub use query::QueryType;
pub use strategies::{
    BasicStrategy, CachedStrategy, ContextualStrategy, FallbackStrategy, HistoryStrategy, PatternStrategy,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Minimum Jaccard score for a fuzzy cache hit
    pub similarity_threshold: f64,
    /// Recent conversations scanned per user
    pub history_limit: usize,
    /// Conversations at or below this many characters are not excerpted
    pub history_min_chars: usize,
    pub history_excerpt_chars: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            history_limit: 10,
            history_min_chars: 100,
            history_excerpt_chars: 500,
        }
    }
}

/// Something the user mentioned earlier in the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedEntity {
    pub kind: String,
    pub value: String,
}

impl ReferencedEntity {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackContext {
    pub user_id: Option<String>,
    pub referenced_entities: Vec<ReferencedEntity>,
}

impl FallbackContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            referenced_entities: Vec::new(),
        }
    }

    pub fn with_entity(mut self, entity: ReferencedEntity) -> Self {
        self.referenced_entities.push(entity);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResult {
    pub strategy: String,
    pub message: String,
    pub success: bool,
    pub services_used: Vec<String>,
    /// Set for cache hits; 1.0 on an exact match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

impl FallbackResult {
    pub fn success(strategy: impl Into<String>, message: impl Into<String>, services: &[&str]) -> Self {
        Self {
            strategy: strategy.into(),
            message: message.into(),
            success: true,
            services_used: services.iter().map(|s| s.to_string()).collect(),
            similarity: None,
        }
    }

    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// Last resort when every strategy failed
    pub fn generic() -> Self {
        Self {
            strategy: "GENERIC".to_string(),
            message: "I couldn't gather information for your request right now. Please try again in a few moments, \
                      or use the Calculator and Database for manual lookups."
                .to_string(),
            success: false,
            services_used: vec!["fallback".to_string()],
            similarity: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackUsage {
    pub uses: u64,
    pub failures: u64,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Runs the strategy chain in order; the first strategy with an answer wins
pub struct FallbackSelector {
    strategies: Vec<Box<dyn FallbackStrategy>>,
    usage: DashMap<String, FallbackUsage>,
}

impl FallbackSelector {
    /// Cached, history, contextual, pattern, then basic
    pub fn new(cache: Arc<dyn CacheStore>, conversations: Arc<dyn ConversationStore>, config: FallbackConfig) -> Self {
        let strategies: Vec<Box<dyn FallbackStrategy>> = vec![
            Box::new(CachedStrategy::new(cache, config.similarity_threshold)),
            Box::new(HistoryStrategy::new(conversations, config)),
            Box::new(ContextualStrategy),
            Box::new(PatternStrategy),
            Box::new(BasicStrategy),
        ];
        Self::with_strategies(strategies)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn FallbackStrategy>>) -> Self {
        Self {
            strategies,
            usage: DashMap::new(),
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(&self, query: &str, context: &FallbackContext) -> FallbackResult {
        let query_type = QueryType::classify(query);

        for strategy in &self.strategies {
            match strategy.attempt(query, context).await {
                Ok(Some(result)) => {
                    self.record_usage(&result.strategy, query_type, true);
                    info!(
                        strategy = %result.strategy,
                        query_type = %query_type,
                        "Fallback strategy answered"
                    );
                    counter!("resilience.fallback.resolved", 1, "strategy" => result.strategy.clone());
                    return result;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Fallback strategy failed");
                    self.record_usage(strategy.name(), query_type, false);
                }
            }
        }

        warn!(query_type = %query_type, "Every fallback strategy failed");
        let result = FallbackResult::generic();
        self.record_usage(&result.strategy, query_type, false);
        counter!("resilience.fallback.resolved", 1, "strategy" => result.strategy.clone());
        result
    }

    fn record_usage(&self, strategy: &str, query_type: QueryType, success: bool) {
        let mut usage = self.usage.entry(usage_key(strategy, query_type)).or_default();
        usage.uses += 1;
        if !success {
            usage.failures += 1;
            usage.last_failure = Some(Utc::now());
        }
    }

    /// Keyed by "{strategy}_{query type}"
    pub fn usage_stats(&self) -> BTreeMap<String, FallbackUsage> {
        self.usage
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// "{strategy}_{query type}", unless the strategy name already ends with the type
fn usage_key(strategy: &str, query_type: QueryType) -> String {
    let suffix = format!("_{}", query_type);
    if strategy.ends_with(&suffix) {
        strategy.to_string()
    } else {
        format!("{}{}", strategy, suffix)
    }
}

impl std::fmt::Debug for FallbackSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackSelector")
            .field("strategies", &self.strategy_names())
            .field("usage_keys", &self.usage.len())
            .finish()
    }
}
