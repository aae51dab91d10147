//! # Degradation Orchestration
//!
//! Per-request entry point of the resilience layer. A request is routed to a
//! tool, run through the circuit breaker under a scoped resource budget, and
//! recorded in the health monitor. When the tool is down or fails, the
//! orchestrator tries the highest-priority tool that is still healthy and
//! finally falls back to the guidance chain, so callers always get an
//! answer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::circuit_breaker::{CallOutcome, CircuitBreaker};
use crate::fallback::guidance::{degraded_answer, progressive_degradation_message, unavailable_services};
use crate::fallback::query::{
    extract_country_code, extract_destination, extract_hs_code, extract_origin, extract_product, is_help_query,
    QueryType,
};
use crate::fallback::{FallbackContext, FallbackSelector, ReferencedEntity};
use crate::health::HealthMonitor;
use crate::logging::{new_correlation_id, request_span};
use crate::monitoring::{emit_event, ResilienceEvent};
use crate::registry::{ToolCall, ToolOutput, ToolRegistry};
use crate::resources::{LoadSample, QueryComplexity, ResourceAllocator, ResourceGuard};
use crate::stores::CacheStore;
use crate::supervisor::PeriodicTask;
use crate::types::ResilienceError;

/// Placeholder content when a degraded tool call falls back
pub const FALLBACK_TOOL_DATA: &str =
    "Service temporarily unavailable. Please try the manual tools or try again later.";

/// Tools shed under pressure, most expendable first
const SHEDDABLE_TOOLS: [&str; 3] = ["risk_assessment", "market_intelligence", "compliance_analysis"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// Lower is more important
    pub priorities: BTreeMap<String, u32>,
    pub default_priority: u32,
    /// Tools at or below this availability score are not tried when degrading
    pub min_availability_score: f64,
    /// Connection pool each tool draws from; unmapped tools take no connection
    pub tool_pools: BTreeMap<String, String>,
    /// Kept enabled with fresh breakers while lower tiers are shed
    pub essential_tools: Vec<String>,
    pub pressure_check_interval: Duration,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        let priorities = [
            ("tariff_lookup", 1),
            ("hs_code_finder", 2),
            ("agreement_tool", 3),
            ("compliance_analysis", 4),
            ("market_intelligence", 5),
            ("risk_assessment", 6),
        ]
        .into_iter()
        .map(|(tool, priority)| (tool.to_string(), priority))
        .collect();

        let tool_pools = [
            ("tariff_lookup", "tariff_api"),
            ("hs_code_finder", "trade_data_api"),
            ("agreement_tool", "trade_data_api"),
            ("compliance_analysis", "customs_api"),
            ("market_intelligence", "trade_data_api"),
            ("risk_assessment", "trade_data_api"),
        ]
        .into_iter()
        .map(|(tool, pool)| (tool.to_string(), pool.to_string()))
        .collect();

        Self {
            priorities,
            default_priority: 10,
            min_availability_score: 0.5,
            tool_pools,
            essential_tools: vec![
                "tariff_lookup".to_string(),
                "hs_code_finder".to_string(),
                "agreement_tool".to_string(),
            ],
            pressure_check_interval: Duration::from_secs(60),
        }
    }
}

impl DegradationConfig {
    pub fn priority(&self, tool: &str) -> u32 {
        self.priorities.get(tool).copied().unwrap_or(self.default_priority)
    }
}

/// One user question as seen by the resilience layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantRequest {
    pub query: String,
    /// Tool to run; routed from the query when absent
    pub tool: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub complexity: QueryComplexity,
    pub referenced_entities: Vec<ReferencedEntity>,
}

impl AssistantRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tool: None,
            user_id: None,
            conversation_id: None,
            complexity: QueryComplexity::Medium,
            referenced_entities: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_complexity(mut self, complexity: QueryComplexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_entity(mut self, entity: ReferencedEntity) -> Self {
        self.referenced_entities.push(entity);
        self
    }

    fn fallback_context(&self) -> FallbackContext {
        FallbackContext {
            user_id: self.user_id.clone(),
            referenced_entities: self.referenced_entities.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub correlation_id: String,
    pub conversation_id: Option<String>,
    pub message: String,
    pub success: bool,
    /// Anything other than the requested tool's own answer
    pub degraded: bool,
    pub tools_used: Vec<String>,
    pub unavailable_tools: Vec<String>,
    /// Fallback strategy that produced the message, if any
    pub strategy: Option<String>,
    pub degradation_reason: Option<String>,
    pub processing_time_ms: u64,
}

/// What one pressure check changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PressureAdjustment {
    pub available_capacity: f64,
    pub disabled: Vec<String>,
    pub restored: Vec<String>,
}

/// Collaborators the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub breaker: Arc<CircuitBreaker>,
    pub health: Arc<HealthMonitor>,
    pub resources: Arc<ResourceAllocator>,
    pub registry: Arc<dyn ToolRegistry>,
    pub fallback: Arc<FallbackSelector>,
    /// Successful answers are written back here for the cached strategy
    pub cache: Option<Arc<dyn CacheStore>>,
}

struct RequestState {
    correlation_id: String,
    started: Instant,
}

pub struct DegradationOrchestrator {
    config: DegradationConfig,
    parts: Collaborators,
    /// Tools this orchestrator shed because of load
    shed: Mutex<BTreeSet<String>>,
    pressure_task: Mutex<Option<PeriodicTask>>,
}

impl DegradationOrchestrator {
    pub fn new(config: DegradationConfig, parts: Collaborators) -> Self {
        Self {
            config,
            parts,
            shed: Mutex::new(BTreeSet::new()),
            pressure_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DegradationConfig {
        &self.config
    }

    /// Tool a query goes to when the request names none
    pub fn route(query: &str) -> Option<&'static str> {
        match QueryType::classify(query) {
            QueryType::Tariff => Some("tariff_lookup"),
            QueryType::HsCode => Some("hs_code_finder"),
            QueryType::Agreement | QueryType::Country => Some("agreement_tool"),
            QueryType::General => None,
        }
    }

    /// Unhealthy, disabled, unregistered, or behind a breaker that is not closed
    pub fn unavailable_tools(&self) -> Vec<String> {
        let mut unavailable = BTreeSet::new();

        for (tool, health) in self.parts.health.all_health() {
            if !health.healthy || health.auto_disabled || health.manually_disabled {
                unavailable.insert(tool);
            }
        }
        for (service, status) in self.parts.breaker.all_statuses() {
            if !status.healthy {
                unavailable.insert(service);
            }
        }
        for tool in self.parts.registry.tool_names() {
            if !self.parts.registry.is_available(&tool) {
                unavailable.insert(tool);
            }
        }

        unavailable.into_iter().collect()
    }

    /// Runs one request end to end; never fails
    pub async fn process(&self, request: AssistantRequest) -> AssistantResponse {
        let state = RequestState {
            correlation_id: new_correlation_id(),
            started: Instant::now(),
        };
        let tool = request
            .tool
            .clone()
            .or_else(|| Self::route(&request.query).map(str::to_string));
        let span = request_span(&state.correlation_id, tool.as_deref().unwrap_or("none"));

        async {
            counter!("resilience.requests", 1);
            let Some(tool) = tool else {
                debug!("No tool for query, answering from the fallback chain");
                return self.answer_from_chain(&request, &state).await;
            };

            let unavailable = self.unavailable_tools();
            if unavailable.contains(&tool) {
                info!(tool = %tool, "Requested tool unavailable, degrading");
                let reason = format!("{} is unavailable", tool);
                return self.degrade(&request, &state, unavailable, &reason).await;
            }

            let guard = match self.parts.resources.allocate_scoped(
                &state.correlation_id,
                request.complexity,
                None,
            ) {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(error = %e, "Admission rejected, degrading");
                    return self.degrade(&request, &state, unavailable, &e.to_string()).await;
                }
            };

            match self.run_tool(&tool, &request.query, &guard).await {
                Ok(output) => {
                    drop(guard);
                    self.remember(&request.query, &output.content).await;
                    self.respond(&state, &request, output.content, vec![tool], Vec::new())
                }
                Err(e) => {
                    drop(guard);
                    warn!(tool = %tool, error = %e, "Tool call failed, degrading");
                    let mut unavailable = self.unavailable_tools();
                    if !unavailable.contains(&tool) {
                        unavailable.push(tool.clone());
                        unavailable.sort();
                    }
                    self.degrade(&request, &state, unavailable, &e.to_string()).await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Breaker-protected call with the allocation's timeout per attempt and a
    /// pooled connection held for the duration
    async fn run_tool(&self, tool: &str, query: &str, guard: &ResourceGuard) -> Result<ToolOutput, ResilienceError> {
        let pool = self
            .config
            .tool_pools
            .get(tool)
            .filter(|pool| self.parts.resources.pool(pool).is_some());
        let connection = match pool {
            Some(pool) => Some(self.parts.resources.acquire_connection(pool).await?),
            None => None,
        };

        let call = tool_call_for(tool, query);
        let policy = self
            .parts
            .breaker
            .config()
            .clone()
            .with_call_timeout(guard.timeout())
            .retry_policy();
        let started = Instant::now();
        let result = self
            .parts
            .breaker
            .execute_with_policy(tool, policy, || self.parts.registry.invoke(call.clone()))
            .await;

        drop(connection);

        match &result {
            Ok(_) => self.parts.health.record_success(tool, started.elapsed()),
            Err(e) if e.is_operation_failure() => self.parts.health.record_failure(tool, &e.to_string()),
            Err(_) => {}
        }
        histogram!("resilience.request.tool_duration_ms", started.elapsed().as_millis() as f64, "tool" => tool.to_string());
        result
    }

    /// Degradation path for a request whose tool cannot answer
    pub async fn handle_degradation(
        &self,
        request: &AssistantRequest,
        unavailable: Vec<String>,
        cause: &str,
    ) -> AssistantResponse {
        let state = RequestState {
            correlation_id: new_correlation_id(),
            started: Instant::now(),
        };
        self.degrade(request, &state, unavailable, cause).await
    }

    async fn degrade(
        &self,
        request: &AssistantRequest,
        state: &RequestState,
        unavailable: Vec<String>,
        cause: &str,
    ) -> AssistantResponse {
        counter!("resilience.requests.degraded", 1);
        emit_event(
            ResilienceEvent::new("degraded_response")
                .details(format!("{} unavailable: {}", unavailable.len(), cause))
                .warning(),
        );

        if !is_help_query(&request.query) {
            if let Some(answer) = self.try_alternative(request, state, &unavailable, cause).await {
                return answer;
            }
        }

        let chain = self
            .parts
            .fallback
            .resolve(&request.query, &request.fallback_context())
            .await;

        let mut message = progressive_degradation_message(&request.query, &unavailable);
        message.push_str(&unavailable_services(&unavailable));
        message.push_str("\n\n");
        message.push_str(&chain.message);

        let mut tools_used = vec!["progressive_degradation".to_string()];
        tools_used.extend(chain.services_used.iter().cloned());

        let mut response = self.respond(state, request, message, tools_used, unavailable);
        response.success = chain.success;
        response.degraded = true;
        response.strategy = Some(chain.strategy);
        response.degradation_reason = Some(cause.to_string());
        response
    }

    /// Highest-priority healthy tool, tried once through the breaker
    async fn try_alternative(
        &self,
        request: &AssistantRequest,
        state: &RequestState,
        unavailable: &[String],
        cause: &str,
    ) -> Option<AssistantResponse> {
        let candidate = self.available_by_priority(unavailable).into_iter().next()?;
        info!(tool = %candidate, "Attempting partial processing");

        let call = tool_call_for(&candidate, &request.query);
        let started = Instant::now();
        let outcome = self
            .parts
            .breaker
            .execute_with_fallback(
                &candidate,
                || self.parts.registry.invoke(call.clone()),
                || ToolOutput::new(candidate.clone(), FALLBACK_TOOL_DATA),
            )
            .await;

        match outcome {
            CallOutcome::Primary(output) => {
                self.parts.health.record_success(&candidate, started.elapsed());
                info!(tool = %candidate, "Processed with degradation");

                let message = degraded_answer(&output.content, unavailable);
                let mut response =
                    self.respond(state, request, message, vec![candidate], unavailable.to_vec());
                response.degraded = true;
                response.degradation_reason = Some(cause.to_string());
                Some(response)
            }
            CallOutcome::Fallback { cause: error, .. } => {
                if error.is_operation_failure() {
                    self.parts.health.record_failure(&candidate, &error.to_string());
                }
                warn!(tool = %candidate, error = %error, "Partial processing failed");
                None
            }
        }
    }

    /// Registered tools not in `unavailable` with a good availability score,
    /// most important first
    pub fn available_by_priority(&self, unavailable: &[String]) -> Vec<String> {
        let mut tools: Vec<String> = self
            .parts
            .registry
            .tool_names()
            .into_iter()
            .filter(|tool| !unavailable.contains(tool))
            .filter(|tool| self.parts.registry.is_available(tool))
            .filter(|tool| self.parts.health.availability_score(tool) > self.config.min_availability_score)
            .collect();
        tools.sort_by(|a, b| {
            self.config
                .priority(a)
                .cmp(&self.config.priority(b))
                .then_with(|| a.cmp(b))
        });
        tools
    }

    async fn answer_from_chain(&self, request: &AssistantRequest, state: &RequestState) -> AssistantResponse {
        let chain = self
            .parts
            .fallback
            .resolve(&request.query, &request.fallback_context())
            .await;
        let mut response = self.respond(state, request, chain.message, chain.services_used, Vec::new());
        response.success = chain.success;
        response.strategy = Some(chain.strategy);
        response
    }

    async fn remember(&self, query: &str, answer: &str) {
        if let Some(cache) = &self.parts.cache {
            if let Err(e) = cache.put(query, answer).await {
                warn!(error = %e, "Failed to cache answer");
            }
        }
    }

    fn respond(
        &self,
        state: &RequestState,
        request: &AssistantRequest,
        message: String,
        tools_used: Vec<String>,
        unavailable_tools: Vec<String>,
    ) -> AssistantResponse {
        let processing_time_ms = state.started.elapsed().as_millis() as u64;
        histogram!("resilience.request.duration_ms", processing_time_ms as f64);

        AssistantResponse {
            correlation_id: state.correlation_id.clone(),
            conversation_id: request.conversation_id.clone(),
            message,
            success: true,
            degraded: false,
            tools_used,
            unavailable_tools,
            strategy: None,
            degradation_reason: None,
            processing_time_ms,
        }
    }

    /// Sheds low-priority tools as capacity shrinks and restores them once
    /// it recovers. Capacity is `1 - max(cpu, memory, network)`.
    pub fn adjust_service_priorities(&self, load: &LoadSample) -> PressureAdjustment {
        let capacity = load.available_capacity();
        let shed_count = if capacity < 0.1 {
            3
        } else if capacity < 0.2 {
            2
        } else if capacity < 0.3 {
            1
        } else {
            0
        };
        let target: BTreeSet<String> = SHEDDABLE_TOOLS[..shed_count].iter().map(|t| t.to_string()).collect();

        let mut adjustment = PressureAdjustment {
            available_capacity: capacity,
            ..PressureAdjustment::default()
        };

        let mut shed = self.shed.lock();
        if *shed == target {
            return adjustment;
        }

        for tool in target.difference(&shed) {
            self.parts.health.set_enabled(tool, false);
            adjustment.disabled.push(tool.clone());
        }
        for tool in shed.difference(&target) {
            self.parts.health.set_enabled(tool, true);
            self.parts.breaker.reset(tool);
            adjustment.restored.push(tool.clone());
        }
        *shed = target;
        let under_pressure = !shed.is_empty();
        drop(shed);

        if under_pressure {
            for tool in &self.config.essential_tools {
                self.parts.health.set_enabled(tool, true);
                self.parts.breaker.reset(tool);
            }
            warn!(
                capacity = capacity,
                disabled = ?adjustment.disabled,
                "Resource pressure, shedding low-priority tools"
            );
        }
        if !adjustment.restored.is_empty() {
            info!(capacity = capacity, restored = ?adjustment.restored, "Pressure eased, tools restored");
        }

        emit_event(
            ResilienceEvent::new("pressure_adjusted")
                .details(format!("capacity {:.2}, {} tool(s) shed", capacity, shed_count)),
        );
        adjustment
    }

    /// Tools currently shed because of load
    pub fn shed_tools(&self) -> Vec<String> {
        self.shed.lock().iter().cloned().collect()
    }

    /// Starts the periodic pressure check; a second call is a no-op
    pub fn start(self: &Arc<Self>) {
        let mut task = self.pressure_task.lock();
        if task.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        *task = Some(PeriodicTask::spawn(
            "pressure-monitor",
            self.config.pressure_check_interval,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(orchestrator) => {
                            let load = orchestrator
                                .parts
                                .resources
                                .latest_load()
                                .unwrap_or_else(|| orchestrator.parts.resources.current_load());
                            orchestrator.adjust_service_priorities(&load);
                            true
                        }
                        None => false,
                    }
                }
            },
        ));
    }

    pub async fn stop(&self) {
        let task = self.pressure_task.lock().take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }
}

impl std::fmt::Debug for DegradationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationOrchestrator")
            .field("config", &self.config)
            .field("shed", &*self.shed.lock())
            .finish()
    }
}

/// Arguments a tool needs, pulled out of the free-text query
pub fn tool_call_for(tool: &str, query: &str) -> ToolCall {
    let call = ToolCall::new(tool);
    match tool {
        "tariff_lookup" => call
            .with_argument("hsCode", extract_hs_code(query))
            .with_argument("originCountry", extract_origin(query))
            .with_argument("destinationCountry", extract_destination(query)),
        "hs_code_finder" => call.with_argument("productDescription", extract_product(query)),
        "agreement_tool" => call.with_argument("countryCode", extract_country_code(query)),
        _ => call.with_argument("query", query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_table() {
        let config = DegradationConfig::default();
        assert_eq!(config.priority("tariff_lookup"), 1);
        assert_eq!(config.priority("risk_assessment"), 6);
        assert_eq!(config.priority("weather"), 10);
    }

    #[test]
    fn test_routing() {
        assert_eq!(DegradationOrchestrator::route("tariff on steel"), Some("tariff_lookup"));
        assert_eq!(DegradationOrchestrator::route("hs code for shoes"), Some("hs_code_finder"));
        assert_eq!(DegradationOrchestrator::route("trade with Japan"), Some("agreement_tool"));
        assert_eq!(DegradationOrchestrator::route("good morning"), None);
    }

    #[test]
    fn test_tool_call_arguments() {
        let call = tool_call_for("tariff_lookup", "tariff for 850440 from Germany to Japan");
        assert_eq!(call.argument("hsCode"), Some("850440"));
        assert_eq!(call.argument("originCountry"), Some("DE"));
        assert_eq!(call.argument("destinationCountry"), Some("JP"));

        let call = tool_call_for("hs_code_finder", "classification of automotive brakes");
        assert_eq!(call.argument("productDescription"), Some("automotive parts"));

        let call = tool_call_for("agreement_tool", "agreements of the United States");
        assert_eq!(call.argument("countryCode"), Some("US"));

        let call = tool_call_for("risk_assessment", "risk of shipping");
        assert_eq!(call.argument("query"), Some("risk of shipping"));
    }
}
