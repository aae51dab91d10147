//! # Configuration
//!
//! One [`ResilienceConfig`] gathers the settings of every component. Values
//! come from defaults, then an optional config file, then `RESILIENCE__*`
//! environment variables (`RESILIENCE__BREAKER__FAILURE_THRESHOLD=3`).
//! Durations are given in milliseconds under `*_ms` keys.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::degradation::DegradationConfig;
use crate::fallback::FallbackConfig;
use crate::health::HealthMonitorConfig;
use crate::logging::LoggingConfig;
use crate::resources::{PoolConfig, ResourceConfig};
use crate::types::Result;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RESILIENCE";

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResilienceConfig {
    pub logging: LoggingConfig,
    pub breaker: CircuitBreakerConfig,
    pub health: HealthMonitorConfig,
    pub resources: ResourceConfig,
    pub fallback: FallbackConfig,
    pub degradation: DegradationConfig,
}

fn millis(cfg: &config::Config, key: &str) -> Option<Duration> {
    cfg.get::<u64>(key).ok().map(Duration::from_millis)
}

macro_rules! override_value {
    ($cfg:expr, $key:expr, $target:expr) => {
        if let Ok(value) = $cfg.get($key) {
            $target = value;
        }
    };
}

macro_rules! override_duration {
    ($cfg:expr, $key:expr, $target:expr) => {
        if let Some(value) = millis($cfg, $key) {
            $target = value;
        }
    };
}

impl ResilienceConfig {
    /// Reads `.env`, the optional file at `path`, then the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let cfg = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded = Self::from_config(&cfg)?;
        debug!(path = ?path, "Resilience configuration loaded");
        Ok(loaded)
    }

    /// Starts from defaults and applies every key present in `cfg`
    pub fn from_config(cfg: &config::Config) -> Result<Self> {
        let mut out = ResilienceConfig {
            logging: LoggingConfig::try_from(cfg.clone())?,
            ..ResilienceConfig::default()
        };

        let breaker = &mut out.breaker;
        override_value!(cfg, "breaker.failure_threshold", breaker.failure_threshold);
        override_value!(cfg, "breaker.max_retries", breaker.max_retries);
        override_value!(cfg, "breaker.backoff_multiplier", breaker.backoff_multiplier);
        override_value!(cfg, "breaker.retry_jitter", breaker.retry_jitter);
        override_duration!(cfg, "breaker.open_timeout_ms", breaker.open_timeout);
        override_duration!(cfg, "breaker.retry_delay_ms", breaker.retry_delay);
        override_duration!(cfg, "breaker.call_timeout_ms", breaker.call_timeout);

        let health = &mut out.health;
        override_value!(cfg, "health.history_size", health.history_size);
        override_value!(cfg, "health.prediction_window", health.prediction_window);
        override_value!(cfg, "health.auto_disable_threshold", health.auto_disable_threshold);
        override_duration!(cfg, "health.check_interval_ms", health.check_interval);
        override_duration!(cfg, "health.probe_timeout_ms", health.probe_timeout);
        override_duration!(cfg, "health.recovery_interval_ms", health.recovery_interval);

        let resources = &mut out.resources;
        override_value!(cfg, "resources.max_total_connections", resources.max_total_connections);
        override_value!(cfg, "resources.memory_headroom", resources.memory_headroom);
        override_value!(cfg, "resources.strict_admission", resources.strict_admission);
        override_value!(cfg, "resources.expand_utilization", resources.expand_utilization);
        override_value!(cfg, "resources.shrink_utilization", resources.shrink_utilization);
        override_value!(cfg, "resources.gc_threshold", resources.gc_threshold);
        override_value!(cfg, "resources.cpu_scaling_threshold", resources.cpu_scaling_threshold);
        override_value!(cfg, "resources.memory_scaling_threshold", resources.memory_scaling_threshold);
        override_value!(cfg, "resources.network_capacity_mbps", resources.network_capacity_mbps);
        override_value!(cfg, "resources.optimization_enabled", resources.optimization_enabled);
        override_duration!(cfg, "resources.idle_timeout_ms", resources.idle_timeout);
        override_duration!(cfg, "resources.memory_optimization_interval_ms", resources.memory_optimization_interval);
        override_duration!(cfg, "resources.pool_optimization_interval_ms", resources.pool_optimization_interval);
        override_duration!(cfg, "resources.scaling_interval_ms", resources.scaling_interval);
        override_duration!(cfg, "resources.orphan_grace_ms", resources.orphan_grace);

        if let Ok(pools) = cfg.get_table("resources.pools") {
            for service in pools.keys() {
                let defaults = resources
                    .pools
                    .get(service)
                    .copied()
                    .unwrap_or_else(|| PoolConfig::new(1, 10, Duration::from_secs(30)));
                let prefix = format!("resources.pools.{}", service);
                let min = cfg.get::<usize>(&format!("{}.min_size", prefix)).unwrap_or(defaults.min_size);
                let max = cfg.get::<usize>(&format!("{}.max_size", prefix)).unwrap_or(defaults.max_size);
                let timeout =
                    millis(cfg, &format!("{}.acquire_timeout_ms", prefix)).unwrap_or(defaults.acquire_timeout);
                resources.pools.insert(service.clone(), PoolConfig::new(min, max, timeout));
            }
        }

        let fallback = &mut out.fallback;
        override_value!(cfg, "fallback.similarity_threshold", fallback.similarity_threshold);
        override_value!(cfg, "fallback.history_limit", fallback.history_limit);
        override_value!(cfg, "fallback.history_min_chars", fallback.history_min_chars);
        override_value!(cfg, "fallback.history_excerpt_chars", fallback.history_excerpt_chars);

        let degradation = &mut out.degradation;
        override_value!(cfg, "degradation.default_priority", degradation.default_priority);
        override_value!(cfg, "degradation.min_availability_score", degradation.min_availability_score);
        override_value!(cfg, "degradation.essential_tools", degradation.essential_tools);
        override_duration!(cfg, "degradation.pressure_check_interval_ms", degradation.pressure_check_interval);
        if let Ok(priorities) = cfg.get::<std::collections::BTreeMap<String, u32>>("degradation.priorities") {
            degradation.priorities.extend(priorities);
        }
        if let Ok(pools) = cfg.get::<std::collections::BTreeMap<String, String>>("degradation.tool_pools") {
            degradation.tool_pools.extend(pools);
        }

        Ok(out)
    }
}
