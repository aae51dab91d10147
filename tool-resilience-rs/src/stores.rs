//! Data sources the fallback chain reads from.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::fallback::query::normalize;

/// Entries kept by the in-memory cache before the oldest is evicted
const MAX_CACHE_ENTRIES: usize = 500;
/// Conversations kept per user by the in-memory store
const MAX_CONVERSATIONS_PER_USER: usize = 50;

/// Previously answered queries
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Cached answer for the query, matched on its normalized form
    async fn get(&self, query: &str) -> anyhow::Result<Option<String>>;

    async fn put(&self, query: &str, response: &str) -> anyhow::Result<()>;

    /// Raw text of every cached query
    async fn cached_queries(&self) -> anyhow::Result<Vec<String>>;
}

/// One prior conversation as listed for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub last_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Most recent first
    async fn recent_conversations(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<ConversationSummary>>;

    async fn conversation_content(&self, conversation_id: &str, user_id: &str) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone)]
struct CachedEntry {
    query: String,
    response: String,
    stored_at: DateTime<Utc>,
}

/// Bounded map keyed by normalized query text
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, query: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&normalize(query)).map(|e| e.response.clone()))
    }

    async fn put(&self, query: &str, response: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.write().await;
        let key = normalize(query);

        if !entries.contains_key(&key) && entries.len() >= MAX_CACHE_ENTRIES {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CachedEntry {
                query: query.to_string(),
                response: response.to_string(),
                stored_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn cached_queries(&self) -> anyhow::Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries.values().map(|e| e.query.clone()).collect())
    }
}

#[derive(Debug, Clone)]
struct StoredConversation {
    summary: ConversationSummary,
    content: String,
}

#[derive(Debug, Default)]
pub struct InMemoryConversations {
    by_user: RwLock<HashMap<String, Vec<StoredConversation>>>,
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends or replaces a conversation; the last message is the final line of content
    pub async fn record(&self, user_id: &str, conversation_id: &str, content: &str) {
        let mut by_user = self.by_user.write().await;
        let conversations = by_user.entry(user_id.to_string()).or_default();
        conversations.retain(|c| c.summary.conversation_id != conversation_id);

        let last_message = content
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string());

        conversations.push(StoredConversation {
            summary: ConversationSummary {
                conversation_id: conversation_id.to_string(),
                last_message,
                updated_at: Utc::now(),
            },
            content: content.to_string(),
        });

        if conversations.len() > MAX_CONVERSATIONS_PER_USER {
            let excess = conversations.len() - MAX_CONVERSATIONS_PER_USER;
            conversations.drain(..excess);
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversations {
    async fn recent_conversations(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<ConversationSummary>> {
        let by_user = self.by_user.read().await;
        Ok(by_user
            .get(user_id)
            .map(|conversations| {
                conversations
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|c| c.summary.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn conversation_content(&self, conversation_id: &str, user_id: &str) -> anyhow::Result<Option<String>> {
        let by_user = self.by_user.read().await;
        Ok(by_user.get(user_id).and_then(|conversations| {
            conversations
                .iter()
                .find(|c| c.summary.conversation_id == conversation_id)
                .map(|c| c.content.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_matches_normalized_query() {
        let cache = InMemoryCache::new();
        cache.put("Tariff on steel?", "25%").await.unwrap();

        assert_eq!(cache.get("tariff   on STEEL").await.unwrap().as_deref(), Some("25%"));
        assert_eq!(cache.cached_queries().await.unwrap(), vec!["Tariff on steel?".to_string()]);
        assert!(cache.get("tariff on wood").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversations_newest_first() {
        let store = InMemoryConversations::new();
        store.record("u1", "c1", "user: hs code for shoes").await;
        store.record("u1", "c2", "user: tariff on cars\nassistant: 2.5%").await;
        store.record("u2", "c3", "user: hello").await;

        let recent = store.recent_conversations("u1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].conversation_id, "c2");
        assert_eq!(recent[0].last_message.as_deref(), Some("assistant: 2.5%"));

        let content = store.conversation_content("c1", "u1").await.unwrap();
        assert_eq!(content.as_deref(), Some("user: hs code for shoes"));
        assert!(store.conversation_content("c1", "u2").await.unwrap().is_none());
    }
}
