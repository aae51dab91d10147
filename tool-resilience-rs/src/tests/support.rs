//! Shared fixtures: a registry whose tools fail on demand and a layer
//! wired with fixed host metrics and instant retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::config::ResilienceConfig;
use crate::registry::{ToolCall, ToolOutput, ToolRegistry};
use crate::resources::FixedMetrics;
use crate::stores::{InMemoryCache, InMemoryConversations};
use crate::ResilienceLayer;

pub const TRADE_TOOLS: [&str; 6] = [
    "tariff_lookup",
    "hs_code_finder",
    "agreement_tool",
    "compliance_analysis",
    "market_intelligence",
    "risk_assessment",
];

/// Remaining failures per tool; `u32::MAX` fails forever
#[derive(Debug, Default)]
pub struct ScriptedRegistry {
    tools: Vec<String>,
    failures: Mutex<HashMap<String, u32>>,
    hanging: Mutex<Vec<String>>,
    unregistered: Mutex<Vec<String>>,
    calls: Mutex<Vec<ToolCall>>,
}

impl ScriptedRegistry {
    pub fn new(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn trade_tools() -> Self {
        Self::new(&TRADE_TOOLS)
    }

    pub fn fail_always(&self, tool: &str) {
        self.failures.lock().insert(tool.to_string(), u32::MAX);
    }

    pub fn fail_times(&self, tool: &str, times: u32) {
        self.failures.lock().insert(tool.to_string(), times);
    }

    /// Calls to `tool` never complete
    pub fn hang(&self, tool: &str) {
        self.hanging.lock().push(tool.to_string());
    }

    pub fn unregister(&self, tool: &str) {
        self.unregistered.lock().push(tool.to_string());
    }

    pub fn calls_to(&self, tool: &str) -> Vec<ToolCall> {
        self.calls.lock().iter().filter(|c| c.name == tool).cloned().collect()
    }
}

#[async_trait]
impl ToolRegistry for ScriptedRegistry {
    fn tool_names(&self) -> Vec<String> {
        self.tools.clone()
    }

    fn is_available(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name) && !self.unregistered.lock().iter().any(|t| t == name)
    }

    async fn invoke(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
        let attempt = {
            let mut calls = self.calls.lock();
            calls.push(call.clone());
            calls.iter().filter(|c| c.name == call.name).count()
        };

        let hangs = self.hanging.lock().iter().any(|t| *t == call.name);
        if hangs {
            std::future::pending::<()>().await;
        }

        let failing = {
            let mut failures = self.failures.lock();
            match failures.get_mut(&call.name) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            }
        };

        if failing {
            anyhow::bail!("{} upstream returned 503 on call {}", call.name, attempt);
        }
        Ok(ToolOutput::new(call.name.clone(), format!("{} data for {:?}", call.name, call.arguments)))
    }
}

/// One attempt per call, no backoff
pub fn instant_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        open_timeout: Duration::from_secs(30),
        retry_delay: Duration::ZERO,
        max_retries: 0,
        call_timeout: Duration::from_secs(5),
        ..CircuitBreakerConfig::default()
    }
}

pub struct Harness {
    pub registry: Arc<ScriptedRegistry>,
    pub metrics: Arc<FixedMetrics>,
    pub cache: Arc<InMemoryCache>,
    pub conversations: Arc<InMemoryConversations>,
    pub layer: ResilienceLayer,
}

pub fn harness() -> Harness {
    harness_with(ScriptedRegistry::trade_tools())
}

pub fn harness_with(registry: ScriptedRegistry) -> Harness {
    let registry = Arc::new(registry);
    let metrics = Arc::new(FixedMetrics::default());
    let cache = Arc::new(InMemoryCache::new());
    let conversations = Arc::new(InMemoryConversations::new());

    let config = ResilienceConfig {
        breaker: instant_breaker(),
        ..ResilienceConfig::default()
    };
    let layer = ResilienceLayer::builder(registry.clone())
        .config(config)
        .metrics_source(metrics.clone())
        .cache(cache.clone())
        .conversations(conversations.clone())
        .build();

    Harness {
        registry,
        metrics,
        cache,
        conversations,
        layer,
    }
}
