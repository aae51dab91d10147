//! # Tool Resilience
//!
//! Resilience layer for a multi-tool trade assistant. It keeps the assistant
//! answering while individual tools fail, slow down or compete for host
//! resources.
//!
//! ## Features
//!
//! - Per-service circuit breakers with retry and exponential backoff
//! - Tool health tracking with trend analysis, failure prediction and
//!   automatic disable/recovery
//! - Complexity-based resource allocation with connection pools and
//!   load-driven scaling
//! - An ordered fallback chain (cache, history, context, patterns, guidance)
//! - Priority-driven graceful degradation that sheds low-value tools under
//!   pressure
//!

pub mod circuit_breaker;
pub mod config;
pub mod degradation;
pub mod fallback;
pub mod health;
pub mod logging;
pub mod monitoring;
pub mod registry;
pub mod resources;
pub mod retry;
pub mod stores;
pub mod supervisor;
pub mod types;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::info;

// Re-export commonly used types
pub use circuit_breaker::{
    CallOutcome, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState,
};
pub use config::ResilienceConfig;
pub use degradation::{
    AssistantRequest, AssistantResponse, Collaborators, DegradationConfig, DegradationOrchestrator,
    PressureAdjustment,
};
pub use fallback::{FallbackConfig, FallbackContext, FallbackResult, FallbackSelector, QueryType, ReferencedEntity};
pub use health::{HealthMonitor, HealthMonitorConfig, ToolHealthSnapshot};
pub use logging::{init_logging, LoggingConfig};
pub use registry::{ToolCall, ToolOutput, ToolRegistry};
pub use resources::{QueryComplexity, ResourceAllocator, ResourceConfig, SystemMetricsSource};
pub use retry::RetryPolicy;
pub use stores::{CacheStore, ConversationStore, InMemoryCache, InMemoryConversations};
pub use types::{ResilienceError, Result};

/// Initializes logging with default settings
pub fn init() -> Result<()> {
    init_logging(None)
}

/// Initializes logging from a loaded configuration
pub fn init_with_config(config: ::config::Config) -> Result<ResilienceConfig> {
    let resilience = ResilienceConfig::from_config(&config)?;
    init_logging(Some(resilience.logging.clone()))?;
    Ok(resilience)
}

/// Every component wired together around one tool registry
#[derive(Debug)]
pub struct ResilienceLayer {
    pub breaker: Arc<CircuitBreaker>,
    pub health: Arc<HealthMonitor>,
    pub resources: Arc<ResourceAllocator>,
    pub fallback: Arc<FallbackSelector>,
    pub orchestrator: Arc<DegradationOrchestrator>,
}

impl ResilienceLayer {
    pub fn builder(registry: Arc<dyn ToolRegistry>) -> ResilienceLayerBuilder {
        ResilienceLayerBuilder {
            registry,
            config: ResilienceConfig::default(),
            metrics_source: None,
            cache: None,
            conversations: None,
        }
    }

    /// Runs one assistant request through the layer
    pub async fn process(&self, request: AssistantRequest) -> AssistantResponse {
        self.orchestrator.process(request).await
    }

    /// Starts the probe sweep, resource maintenance and pressure checks
    pub fn start(&self) {
        self.health.start();
        self.resources.start();
        self.orchestrator.start();
        info!("Resilience layer started");
    }

    pub async fn shutdown(&self) {
        self.orchestrator.stop().await;
        self.resources.stop().await;
        self.health.stop().await;
        info!("Resilience layer stopped");
    }
}

pub struct ResilienceLayerBuilder {
    registry: Arc<dyn ToolRegistry>,
    config: ResilienceConfig,
    metrics_source: Option<Arc<dyn SystemMetricsSource>>,
    cache: Option<Arc<dyn CacheStore>>,
    conversations: Option<Arc<dyn ConversationStore>>,
}

impl ResilienceLayerBuilder {
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Host metrics source; sysinfo when unset
    pub fn metrics_source(mut self, source: Arc<dyn SystemMetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn conversations(mut self, conversations: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(conversations);
        self
    }

    pub fn build(self) -> ResilienceLayer {
        let ResilienceConfig {
            breaker,
            health,
            resources,
            fallback,
            degradation,
            ..
        } = self.config;

        let cache: Arc<dyn CacheStore> = self.cache.unwrap_or_else(|| Arc::new(InMemoryCache::new()));
        let conversations: Arc<dyn ConversationStore> = self
            .conversations
            .unwrap_or_else(|| Arc::new(InMemoryConversations::new()));

        let breaker = Arc::new(CircuitBreaker::new(breaker));
        let health = Arc::new(HealthMonitor::new(health, self.registry.clone()));
        let resources = Arc::new(match self.metrics_source {
            Some(source) => ResourceAllocator::new(resources, source),
            None => ResourceAllocator::with_host_metrics(resources),
        });
        let fallback = Arc::new(FallbackSelector::new(cache.clone(), conversations, fallback));

        let orchestrator = Arc::new(DegradationOrchestrator::new(
            degradation,
            Collaborators {
                breaker: breaker.clone(),
                health: health.clone(),
                resources: resources.clone(),
                registry: self.registry,
                fallback: fallback.clone(),
                cache: Some(cache),
            },
        ));

        ResilienceLayer {
            breaker,
            health,
            resources,
            fallback,
            orchestrator,
        }
    }
}
