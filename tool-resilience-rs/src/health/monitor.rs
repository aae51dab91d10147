//! # Health Monitor
//!
//! Owns the per-tool metrics, trend analyzer, failure predictor and
//! availability manager. Callers report outcomes through
//! [`HealthMonitor::record_success`] and [`HealthMonitor::record_failure`];
//! a periodic sweep probes every enabled tool through the [`ToolRegistry`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::availability::{AvailabilityManager, FailureEffect, AUTO_DISABLE_THRESHOLD, RECOVERY_INTERVAL};
use super::dashboard::{AlertLevel, DashboardSnapshot, HealthAlert, SystemDashboard};
use super::metrics::{ErrorCategory, ExecutionRecord, ToolMetrics, CRITICAL_THRESHOLD, DEGRADATION_THRESHOLD, SLOW_THRESHOLD_MS};
use super::prediction::{FailurePrediction, FailurePredictor, RiskLevel, PREDICTION_WINDOW};
use super::trend::{Trend, TrendAnalysis, TrendAnalyzer, TREND_WINDOW};
use crate::monitoring::{emit_event, ResilienceEvent};
use crate::registry::{ToolCall, ToolRegistry};
use crate::supervisor::PeriodicTask;

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitorConfig {
    /// Period of the background probe sweep
    pub check_interval: Duration,
    /// Hard limit for one synthetic probe
    pub probe_timeout: Duration,
    /// Records kept for trend analysis
    pub history_size: usize,
    /// Records kept for failure prediction
    pub prediction_window: usize,
    /// Consecutive failures before auto-disable
    pub auto_disable_threshold: u32,
    /// Minimum time between auto-recovery attempts
    pub recovery_interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(30),
            history_size: TREND_WINDOW,
            prediction_window: PREDICTION_WINDOW,
            auto_disable_threshold: AUTO_DISABLE_THRESHOLD,
            recovery_interval: RECOVERY_INTERVAL,
        }
    }
}

/// Derived view of one tool's health
#[derive(Debug, Clone, Serialize)]
pub struct ToolHealthSnapshot {
    pub tool: String,
    pub healthy: bool,
    pub status_text: String,
    pub success_rate: f64,
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub average_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub slow_execution_count: u64,
    pub error_patterns: HashMap<ErrorCategory, u64>,
    pub trend: TrendAnalysis,
    pub prediction: FailurePrediction,
    pub availability_score: f64,
    pub auto_disabled: bool,
    pub manually_disabled: bool,
    pub consecutive_failures: u32,
    pub disable_reason: Option<String>,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Outcome counts of one probe sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthCheckReport {
    pub probed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub recovery_attempts: usize,
    pub alerts_raised: usize,
}

#[derive(Debug)]
struct ToolHealth {
    metrics: ToolMetrics,
    trend: TrendAnalyzer,
    predictor: FailurePredictor,
    availability: AvailabilityManager,
    last_trend: Trend,
}

impl ToolHealth {
    fn new(config: &HealthMonitorConfig) -> Self {
        Self {
            metrics: ToolMetrics::new(config.history_size),
            trend: TrendAnalyzer::new(config.history_size),
            predictor: FailurePredictor::new(config.prediction_window),
            availability: AvailabilityManager::new(config.auto_disable_threshold, config.recovery_interval),
            last_trend: Trend::InsufficientData,
        }
    }

    fn snapshot(&self, tool: &str) -> ToolHealthSnapshot {
        let metrics = &self.metrics;
        let status_text = if metrics.total_executions() == 0 {
            "No metrics available".to_string()
        } else {
            metrics.status_text()
        };

        ToolHealthSnapshot {
            tool: tool.to_string(),
            healthy: metrics.is_healthy() && !self.availability.should_disable(),
            status_text,
            success_rate: metrics.success_rate(),
            total_executions: metrics.total_executions(),
            success_count: metrics.success_count(),
            failure_count: metrics.failure_count(),
            average_latency_ms: metrics.average_latency_ms(),
            p95_latency_ms: metrics.p95_latency_ms(),
            min_latency_ms: metrics.min_latency_ms(),
            max_latency_ms: metrics.max_latency_ms(),
            slow_execution_count: metrics.slow_execution_count(),
            error_patterns: metrics.error_patterns().clone(),
            trend: self.trend.analyze(),
            prediction: self.predictor.predict(),
            availability_score: self.availability.score(),
            auto_disabled: self.availability.is_auto_disabled(),
            manually_disabled: self.availability.is_manually_disabled(),
            consecutive_failures: self.availability.consecutive_failures(),
            disable_reason: self.availability.disable_reason().map(str::to_string),
            last_error: metrics.last_error().map(str::to_string),
            last_success_at: metrics.last_success_at(),
            last_error_at: metrics.last_error_at(),
            created_at: metrics.created_at(),
        }
    }
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    registry: Arc<dyn ToolRegistry>,
    tools: DashMap<String, Arc<Mutex<ToolHealth>>>,
    dashboard: Mutex<SystemDashboard>,
    sweep: Mutex<Option<PeriodicTask>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig, registry: Arc<dyn ToolRegistry>) -> Self {
        Self {
            config,
            registry,
            tools: DashMap::new(),
            dashboard: Mutex::new(SystemDashboard::default()),
            sweep: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    fn entry(&self, tool: &str) -> Arc<Mutex<ToolHealth>> {
        if let Some(existing) = self.tools.get(tool) {
            return existing.clone();
        }
        self.tools
            .entry(tool.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ToolHealth::new(&self.config))))
            .clone()
    }

    fn existing(&self, tool: &str) -> Option<Arc<Mutex<ToolHealth>>> {
        self.tools.get(tool).map(|e| e.clone())
    }

    pub fn record_success(&self, tool: &str, duration: Duration) {
        let entry = self.entry(tool);
        let (recovered, score) = {
            let mut health = entry.lock();
            health.metrics.record_success(duration);
            let record = ExecutionRecord::success(duration);
            health.trend.record(record.clone());
            health.predictor.record(record);
            (health.availability.record_success(), health.availability.score())
        };

        self.dashboard.lock().record_success(duration);

        counter!("resilience.health.executions", 1, "tool" => tool.to_string(), "outcome" => "success");
        histogram!("resilience.health.latency_ms", duration.as_millis() as f64, "tool" => tool.to_string());
        gauge!("resilience.health.availability_score", score, "tool" => tool.to_string());

        if recovered {
            info!(tool = %tool, "Tool recovered, auto-disable cleared");
            emit_event(ResilienceEvent::new("tool_recovered").service(tool));
        }
    }

    pub fn record_failure(&self, tool: &str, error: &str) {
        let entry = self.entry(tool);
        let (before, after, effect, score) = {
            let mut health = entry.lock();
            let before = health.metrics.success_rate();
            health.metrics.record_failure(error);
            let record = ExecutionRecord::failure(error);
            health.trend.record(record.clone());
            health.predictor.record(record);
            let effect = health.availability.record_failure(error);
            (before, health.metrics.success_rate(), effect, health.availability.score())
        };

        counter!(
            "resilience.health.executions", 1,
            "tool" => tool.to_string(),
            "outcome" => "failure",
            "category" => ErrorCategory::categorize(error).to_string()
        );
        gauge!("resilience.health.availability_score", score, "tool" => tool.to_string());

        let mut dashboard = self.dashboard.lock();
        dashboard.record_failure();

        if after < CRITICAL_THRESHOLD && before >= CRITICAL_THRESHOLD {
            let alert = dashboard.raise(
                tool,
                AlertLevel::Critical,
                format!("Success rate dropped to {:.1}%", after * 100.0),
            );
            warn!(tool = %tool, alert = %alert, "Health alert");
        } else if after < DEGRADATION_THRESHOLD && before >= DEGRADATION_THRESHOLD {
            let alert = dashboard.raise(
                tool,
                AlertLevel::Degradation,
                format!("Success rate dropped to {:.1}%", after * 100.0),
            );
            warn!(tool = %tool, alert = %alert, "Health alert");
        }

        if effect == FailureEffect::AutoDisabled {
            let reason = format!("Too many consecutive failures: {}", error);
            dashboard.raise(tool, AlertLevel::AutoDisabled, reason.clone());
            drop(dashboard);
            warn!(tool = %tool, reason = %reason, "Tool auto-disabled");
            emit_event(
                ResilienceEvent::new("tool_auto_disabled")
                    .service(tool)
                    .details(reason)
                    .warning(),
            );
        }
    }

    /// Snapshot for one tool; unknown tools report a fresh healthy record
    pub fn health(&self, tool: &str) -> ToolHealthSnapshot {
        match self.existing(tool) {
            Some(entry) => entry.lock().snapshot(tool),
            None => ToolHealth::new(&self.config).snapshot(tool),
        }
    }

    pub fn all_health(&self) -> HashMap<String, ToolHealthSnapshot> {
        self.tool_entries()
            .into_iter()
            .map(|(tool, entry)| {
                let snapshot = entry.lock().snapshot(&tool);
                (tool, snapshot)
            })
            .collect()
    }

    pub fn availability_score(&self, tool: &str) -> f64 {
        self.existing(tool)
            .map(|entry| entry.lock().availability.score())
            .unwrap_or(1.0)
    }

    pub fn should_disable(&self, tool: &str) -> bool {
        self.existing(tool)
            .map(|entry| entry.lock().availability.should_disable())
            .unwrap_or(false)
    }

    pub fn is_healthy(&self, tool: &str) -> bool {
        self.existing(tool)
            .map(|entry| {
                let health = entry.lock();
                health.metrics.is_healthy() && !health.availability.should_disable()
            })
            .unwrap_or(true)
    }

    pub fn set_enabled(&self, tool: &str, enabled: bool) {
        let entry = self.entry(tool);
        entry.lock().availability.set_enabled(enabled);
        info!(tool = %tool, enabled, "Tool availability changed manually");
        emit_event(
            ResilienceEvent::new(if enabled { "tool_enabled" } else { "tool_disabled" }).service(tool),
        );
    }

    pub fn trend(&self, tool: &str) -> TrendAnalysis {
        match self.existing(tool) {
            Some(entry) => entry.lock().trend.analyze(),
            None => TrendAnalyzer::default().analyze(),
        }
    }

    pub fn prediction(&self, tool: &str) -> FailurePrediction {
        match self.existing(tool) {
            Some(entry) => entry.lock().predictor.predict(),
            None => FailurePredictor::default().predict(),
        }
    }

    pub fn dashboard(&self) -> DashboardSnapshot {
        self.dashboard.lock().snapshot()
    }

    pub fn alerts(&self, tool: &str) -> Vec<HealthAlert> {
        self.dashboard.lock().alerts_for(tool)
    }

    fn tool_entries(&self) -> Vec<(String, Arc<Mutex<ToolHealth>>)> {
        self.tools
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Probes every enabled tool once, then refreshes trends and alerts.
    ///
    /// Probe failures are recorded, never returned.
    pub async fn run_health_checks(&self) -> HealthCheckReport {
        let mut report = HealthCheckReport::default();

        for (tool, entry) in self.tool_entries() {
            if entry.lock().availability.attempt_recovery() {
                report.recovery_attempts += 1;
                info!(tool = %tool, "Attempting auto-recovery of disabled tool");
            }
        }

        let mut targets = Vec::new();
        for tool in self.registry.tool_names() {
            let manually_disabled = self
                .existing(&tool)
                .map(|e| e.lock().availability.is_manually_disabled())
                .unwrap_or(false);
            if self.registry.is_available(&tool) && !manually_disabled {
                targets.push(tool);
            } else {
                report.skipped += 1;
            }
        }

        let probes = targets.iter().map(|tool| self.probe(tool));
        for ok in join_all(probes).await {
            report.probed += 1;
            if ok {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }

        report.alerts_raised = self.review_all();
        self.dashboard.lock().touch();

        debug!(
            probed = report.probed,
            failed = report.failed,
            skipped = report.skipped,
            "Health check sweep finished"
        );
        report
    }

    async fn probe(&self, tool: &str) -> bool {
        let started = Instant::now();
        let call = ToolCall::health_probe(tool);
        match timeout(self.config.probe_timeout, self.registry.invoke(call)).await {
            Ok(Ok(_)) => {
                self.record_success(tool, started.elapsed());
                true
            }
            Ok(Err(err)) => {
                self.record_failure(tool, &format!("Health check failed: {}", err));
                false
            }
            Err(_) => {
                self.record_failure(
                    tool,
                    &format!("Health check timeout after {}ms", self.config.probe_timeout.as_millis()),
                );
                false
            }
        }
    }

    /// Recomputes trend and prediction for every tool and raises sweep alerts
    fn review_all(&self) -> usize {
        let mut raised = 0;

        for (tool, entry) in self.tool_entries() {
            let (rate, avg, executions, trend, prediction, previous) = {
                let mut health = entry.lock();
                let trend = health.trend.analyze();
                let previous = std::mem::replace(&mut health.last_trend, trend.direction);
                (
                    health.metrics.success_rate(),
                    health.metrics.average_latency_ms(),
                    health.metrics.total_executions(),
                    trend,
                    health.predictor.predict(),
                    previous,
                )
            };

            if trend.direction != previous {
                match trend.direction {
                    Trend::Degrading => warn!(tool = %tool, trend = %trend.description, "Tool performance degrading"),
                    Trend::Improving => info!(tool = %tool, trend = %trend.description, "Tool performance improving"),
                    _ => {}
                }
            }
            if prediction.risk == RiskLevel::High {
                warn!(tool = %tool, prediction = %prediction.description, "High failure risk predicted");
            }

            if executions == 0 {
                continue;
            }

            let mut dashboard = self.dashboard.lock();
            if rate < CRITICAL_THRESHOLD {
                dashboard.raise(&tool, AlertLevel::Critical, format!("Success rate {:.1}%", rate * 100.0));
                raised += 1;
            } else if rate < DEGRADATION_THRESHOLD {
                dashboard.raise(&tool, AlertLevel::Degradation, format!("Success rate {:.1}%", rate * 100.0));
                raised += 1;
            }
            if avg > SLOW_THRESHOLD_MS {
                dashboard.raise(&tool, AlertLevel::Slow, format!("Average response time {}ms", avg));
                raised += 1;
            }
        }

        raised
    }

    /// Starts the periodic probe sweep; a second call is a no-op
    pub fn start(self: &Arc<Self>) {
        let mut sweep = self.sweep.lock();
        if sweep.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        *sweep = Some(PeriodicTask::spawn(
            "health-check",
            self.config.check_interval,
            move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(monitor) => {
                            monitor.run_health_checks().await;
                            true
                        }
                        None => false,
                    }
                }
            },
        ));
    }

    pub async fn stop(&self) {
        let task = self.sweep.lock().take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("tools", &self.tools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MockToolRegistry, ToolOutput};

    fn monitor() -> HealthMonitor {
        let mut registry = MockToolRegistry::new();
        registry.expect_tool_names().returning(Vec::new);
        HealthMonitor::new(HealthMonitorConfig::default(), Arc::new(registry))
    }

    #[test]
    fn test_unknown_tool_is_healthy() {
        let monitor = monitor();
        let snapshot = monitor.health("nothing");
        assert!(snapshot.healthy);
        assert_eq!(snapshot.status_text, "No metrics available");
        assert_eq!(monitor.availability_score("nothing"), 1.0);
        assert!(monitor.all_health().is_empty());
    }

    #[test]
    fn test_threshold_crossing_alerts_once() {
        let monitor = monitor();
        monitor.record_success("tariff_lookup", Duration::from_millis(50));
        monitor.record_success("tariff_lookup", Duration::from_millis(50));
        monitor.record_failure("tariff_lookup", "timeout"); // 66%
        monitor.record_failure("tariff_lookup", "timeout"); // 50%
        monitor.record_failure("tariff_lookup", "timeout"); // 40%

        let alerts: Vec<String> = monitor
            .alerts("tariff_lookup")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].starts_with("DEGRADATION: "));
        assert!(alerts[1].starts_with("CRITICAL: "));
    }

    #[test]
    fn test_auto_disable_raises_alert() {
        let monitor = monitor();
        for i in 0..5 {
            monitor.record_failure("agreement_tool", &format!("connection refused #{}", i));
        }
        let snapshot = monitor.health("agreement_tool");
        assert!(snapshot.auto_disabled);
        assert!(!snapshot.healthy);
        assert_eq!(snapshot.availability_score, 0.1);
        assert_eq!(snapshot.error_patterns.get(&ErrorCategory::Connection), Some(&5));
        assert!(monitor
            .alerts("agreement_tool")
            .iter()
            .any(|a| a.level == AlertLevel::AutoDisabled));
    }

    fn sweep_registry(tools: &[&str]) -> MockToolRegistry {
        let names: Vec<String> = tools.iter().map(|t| t.to_string()).collect();
        let mut registry = MockToolRegistry::new();
        registry.expect_tool_names().returning(move || names.clone());
        registry.expect_is_available().returning(|_| true);
        registry
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_recovers_disabled_tool_when_probe_succeeds() {
        let mut registry = sweep_registry(&["agreement_tool"]);
        registry
            .expect_invoke()
            .withf(|call| call.name == "agreement_tool" && call.argument("countryCode") == Some("US"))
            .times(1)
            .returning(|call| Ok(ToolOutput::new(call.name, "ok")));
        let monitor = HealthMonitor::new(HealthMonitorConfig::default(), Arc::new(registry));

        for i in 0..5 {
            monitor.record_failure("agreement_tool", &format!("connection refused #{}", i));
        }
        assert!(monitor.health("agreement_tool").auto_disabled);

        tokio::time::advance(RECOVERY_INTERVAL).await;
        let report = monitor.run_health_checks().await;

        assert_eq!(report.recovery_attempts, 1);
        assert_eq!(report.probed, 1);
        assert_eq!(report.succeeded, 1);
        let snapshot = monitor.health("agreement_tool");
        assert!(!snapshot.auto_disabled);
        assert!(snapshot.disable_reason.is_none());
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.availability_score, 1.0);
        assert_eq!(snapshot.success_count, 1);
    }

    #[tokio::test]
    async fn test_sweep_records_failed_probe_and_skips_disabled() {
        let mut registry = sweep_registry(&["risk_assessment", "market_intelligence"]);
        registry
            .expect_invoke()
            .withf(|call| call.name == "risk_assessment")
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("upstream returned 503")));
        let monitor = HealthMonitor::new(HealthMonitorConfig::default(), Arc::new(registry));
        monitor.set_enabled("market_intelligence", false);

        let report = monitor.run_health_checks().await;

        assert_eq!(
            report,
            HealthCheckReport {
                probed: 1,
                succeeded: 0,
                failed: 1,
                skipped: 1,
                recovery_attempts: 0,
                alerts_raised: 1,
            }
        );
        let snapshot = monitor.health("risk_assessment");
        assert_eq!(snapshot.failure_count, 1);
        assert!(snapshot.last_error.unwrap().starts_with("Health check failed: upstream returned 503"));
        assert!(monitor
            .alerts("risk_assessment")
            .iter()
            .any(|a| a.level == AlertLevel::Critical));
        assert_eq!(monitor.health("market_intelligence").total_executions, 0);
    }

    #[test]
    fn test_manual_disable() {
        let monitor = monitor();
        monitor.set_enabled("risk_assessment", false);
        assert!(monitor.should_disable("risk_assessment"));
        assert_eq!(monitor.availability_score("risk_assessment"), 0.0);

        monitor.set_enabled("risk_assessment", true);
        assert!(!monitor.should_disable("risk_assessment"));
    }
}
