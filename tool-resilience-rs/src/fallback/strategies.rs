//! The individual steps of the fallback chain.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::fallback::guidance::{help_message, pattern_guidance};
use crate::fallback::query::{is_help_query, jaccard_similarity, QueryType};
use crate::fallback::{FallbackConfig, FallbackContext, FallbackResult};
use crate::stores::{CacheStore, ConversationStore};

/// One way of producing a degraded answer.
///
/// `Ok(None)` means the strategy had nothing to offer and the chain moves
/// on; `Err` is logged and counted as a failure of that strategy.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, query: &str, context: &FallbackContext) -> anyhow::Result<Option<FallbackResult>>;
}

/// Exact cache hit, else the closest cached query above the similarity threshold
pub struct CachedStrategy {
    cache: Arc<dyn CacheStore>,
    similarity_threshold: f64,
}

impl CachedStrategy {
    pub fn new(cache: Arc<dyn CacheStore>, similarity_threshold: f64) -> Self {
        Self {
            cache,
            similarity_threshold,
        }
    }

    async fn best_match(&self, query: &str) -> anyhow::Result<Option<(String, f64)>> {
        let best = self
            .cache
            .cached_queries()
            .await?
            .into_iter()
            .map(|cached| {
                let score = jaccard_similarity(query, &cached);
                (cached, score)
            })
            .filter(|(_, score)| *score >= self.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        Ok(best)
    }
}

#[async_trait]
impl FallbackStrategy for CachedStrategy {
    fn name(&self) -> &'static str {
        "CACHED"
    }

    async fn attempt(&self, query: &str, _context: &FallbackContext) -> anyhow::Result<Option<FallbackResult>> {
        if let Some(response) = self.cache.get(query).await? {
            let message = format!(
                "Based on a similar previous query:\n\n{}\n\n*Note: This is from cached data and may not be current.*",
                response
            );
            return Ok(Some(
                FallbackResult::success("CACHED", message, &["cache", "fallback"]).with_similarity(1.0),
            ));
        }

        let Some((similar, score)) = self.best_match(query).await? else {
            return Ok(None);
        };
        debug!(query = %query, matched = %similar, similarity = score, "Fuzzy cache match");

        let Some(response) = self.cache.get(&similar).await? else {
            return Ok(None);
        };
        let message = format!(
            "I found information for a similar query:\n\n{}\n\n*Note: This may not exactly match your question.*",
            response
        );
        Ok(Some(
            FallbackResult::success("SIMILAR_CACHED", message, &["cache", "fallback"]).with_similarity(score),
        ))
    }
}

/// Excerpt from the user's last conversation about the same kind of thing
pub struct HistoryStrategy {
    conversations: Arc<dyn ConversationStore>,
    config: FallbackConfig,
}

impl HistoryStrategy {
    pub fn new(conversations: Arc<dyn ConversationStore>, config: FallbackConfig) -> Self {
        Self { conversations, config }
    }

    fn excerpt(&self, content: &str) -> Option<String> {
        if content.chars().count() <= self.config.history_min_chars {
            return None;
        }
        let head: String = content.chars().take(self.config.history_excerpt_chars).collect();
        Some(format!("{}...", head))
    }
}

#[async_trait]
impl FallbackStrategy for HistoryStrategy {
    fn name(&self) -> &'static str {
        "HISTORY"
    }

    async fn attempt(&self, query: &str, context: &FallbackContext) -> anyhow::Result<Option<FallbackResult>> {
        let Some(user_id) = context.user_id.as_deref() else {
            return Ok(None);
        };

        let query_type = QueryType::classify(query);
        let recent = self
            .conversations
            .recent_conversations(user_id, self.config.history_limit)
            .await?;

        for summary in recent {
            let same_bucket = summary
                .last_message
                .as_deref()
                .is_some_and(|last| QueryType::classify(last) == query_type);
            if !same_bucket {
                continue;
            }

            let content = self
                .conversations
                .conversation_content(&summary.conversation_id, user_id)
                .await?;
            if let Some(excerpt) = content.as_deref().and_then(|c| self.excerpt(c)) {
                let message = format!(
                    "Based on your recent conversations:\n\n{}\n\n*This is from your conversation history and may help with your current question.*",
                    excerpt
                );
                return Ok(Some(FallbackResult::success("HISTORY", message, &["history", "fallback"])));
            }
        }

        Ok(None)
    }
}

/// Acknowledges entities named earlier in the session
pub struct ContextualStrategy;

#[async_trait]
impl FallbackStrategy for ContextualStrategy {
    fn name(&self) -> &'static str {
        "CONTEXTUAL"
    }

    async fn attempt(&self, _query: &str, context: &FallbackContext) -> anyhow::Result<Option<FallbackResult>> {
        if context.referenced_entities.is_empty() {
            return Ok(None);
        }

        let mut message = String::from("I understand you're asking about:\n");
        for entity in &context.referenced_entities {
            let _ = writeln!(message, "• {}: {}", entity.kind, entity.value);
        }
        message.push_str("\nWhile I can't process your full request right now, you can:\n");
        message.push_str("• Use the Calculator for tariff calculations\n");
        message.push_str("• Browse the Database for detailed information\n");
        message.push_str("• Try rephrasing your question\n");

        Ok(Some(FallbackResult::success("CONTEXTUAL", message, &["context", "fallback"])))
    }
}

/// Canned guidance for recognised query types
pub struct PatternStrategy;

#[async_trait]
impl FallbackStrategy for PatternStrategy {
    fn name(&self) -> &'static str {
        "PATTERN"
    }

    async fn attempt(&self, query: &str, _context: &FallbackContext) -> anyhow::Result<Option<FallbackResult>> {
        let query_type = QueryType::classify(query);
        // general queries are left to the basic strategy so help requests get the help text
        if query_type == QueryType::General {
            return Ok(None);
        }

        Ok(Some(FallbackResult::success(
            format!("PATTERN_{}", query_type),
            pattern_guidance(query, query_type),
            &["pattern", "fallback"],
        )))
    }
}

/// Always answers: help text for help requests, otherwise general guidance
pub struct BasicStrategy;

#[async_trait]
impl FallbackStrategy for BasicStrategy {
    fn name(&self) -> &'static str {
        "BASIC"
    }

    async fn attempt(&self, query: &str, _context: &FallbackContext) -> anyhow::Result<Option<FallbackResult>> {
        let message = if is_help_query(query) {
            help_message()
        } else {
            pattern_guidance(query, QueryType::classify(query))
        };
        Ok(Some(FallbackResult::success("BASIC", message, &["fallback"])))
    }
}
