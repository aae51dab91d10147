//! # Resource Allocation
//!
//! Sizes per-request budgets from query complexity and host load, and owns
//! one elastic [`ConnectionPool`] per service. Three periodic jobs keep the
//! pools in shape: memory optimization, pool rebalancing and scaling
//! analysis.

pub mod allocation;
pub mod pool;
pub mod scaling;
pub mod system;

pub use allocation::{QueryComplexity, ResourceAllocation, ResourceOverrides, ResourcePriority, TierBudget};
pub use pool::{ConnectionHandle, ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use scaling::{LoadSample, ScalingAction, ScalingAnalyzer, ScalingRecommendation};
pub use system::{FixedMetrics, HostMetrics, SysinfoMetrics, SystemMetricsSource};

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::supervisor::PeriodicTask;
use crate::types::{ResilienceError, Result};

/// Allocator and pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Pools created at startup, keyed by service
    pub pools: BTreeMap<String, PoolConfig>,
    /// Global ceiling on connections reserved by live allocations
    pub max_total_connections: u32,
    /// Share of free memory an allocation may claim
    pub memory_headroom: f64,
    /// Reject instead of granting when even a reduced budget does not fit
    pub strict_admission: bool,
    /// Idle handles older than this are reclaimed
    pub idle_timeout: Duration,
    pub expand_utilization: f64,
    pub shrink_utilization: f64,
    /// Memory usage that triggers the optimization pass
    pub gc_threshold: f64,
    pub cpu_scaling_threshold: f64,
    pub memory_scaling_threshold: f64,
    pub memory_optimization_interval: Duration,
    pub pool_optimization_interval: Duration,
    pub scaling_interval: Duration,
    /// Extra time past its own timeout before an allocation counts as orphaned
    pub orphan_grace: Duration,
    pub network_capacity_mbps: u64,
    /// Whether `start` schedules the background jobs
    pub optimization_enabled: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        let pools = [
            ("llm_api", 10, 30, 30),
            ("tariff_api", 5, 15, 20),
            ("trade_data_api", 5, 15, 20),
            ("customs_api", 3, 10, 25),
            ("database", 10, 25, 10),
            ("cache", 5, 15, 5),
        ]
        .into_iter()
        .map(|(service, min, max, secs)| {
            (service.to_string(), PoolConfig::new(min, max, Duration::from_secs(secs)))
        })
        .collect();

        Self {
            pools,
            max_total_connections: 50,
            memory_headroom: 0.8,
            strict_admission: false,
            idle_timeout: Duration::from_secs(10 * 60),
            expand_utilization: 0.8,
            shrink_utilization: 0.3,
            gc_threshold: 0.8,
            cpu_scaling_threshold: 0.7,
            memory_scaling_threshold: 0.8,
            memory_optimization_interval: Duration::from_secs(10 * 60),
            pool_optimization_interval: Duration::from_secs(5 * 60),
            scaling_interval: Duration::from_secs(2 * 60),
            orphan_grace: Duration::from_secs(60),
            network_capacity_mbps: 1000,
            optimization_enabled: true,
        }
    }
}

#[derive(Debug, Default)]
struct Reservations {
    memory_mb: u64,
    connections: u32,
}

/// Result of one memory optimization pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryOptimization {
    pub memory_usage: f64,
    pub orphans_released: usize,
    pub aggressive: bool,
    pub connections_closed: usize,
}

/// Snapshot for administrative endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStats {
    pub pools: BTreeMap<String, PoolStats>,
    pub active_allocations: usize,
    pub allocated_memory_mb: u64,
    pub reserved_connections: u32,
    pub active_connections: usize,
    pub latest_load: Option<LoadSample>,
    pub last_recommendation: Option<ScalingRecommendation>,
}

pub struct ResourceAllocator {
    config: ResourceConfig,
    source: Arc<dyn SystemMetricsSource>,
    pools: DashMap<String, Arc<ConnectionPool>>,
    allocations: DashMap<String, ResourceAllocation>,
    next_grant: AtomicU64,
    reservations: Mutex<Reservations>,
    scaling: Mutex<ScalingAnalyzer>,
    last_recommendation: Mutex<Option<ScalingRecommendation>>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl ResourceAllocator {
    pub fn new(config: ResourceConfig, source: Arc<dyn SystemMetricsSource>) -> Self {
        let pools = DashMap::new();
        for (service, pool_config) in &config.pools {
            pools.insert(service.clone(), Arc::new(ConnectionPool::new(service.clone(), *pool_config)));
            debug!(
                service = %service,
                min = pool_config.min_size,
                max = pool_config.max_size,
                timeout_ms = pool_config.acquire_timeout.as_millis() as u64,
                "Created connection pool"
            );
        }
        info!(pools = pools.len(), "Resource allocator initialized");

        let scaling = ScalingAnalyzer::new(config.cpu_scaling_threshold, config.memory_scaling_threshold);

        Self {
            config,
            source,
            pools,
            allocations: DashMap::new(),
            next_grant: AtomicU64::new(1),
            reservations: Mutex::new(Reservations::default()),
            scaling: Mutex::new(scaling),
            last_recommendation: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Allocator reading real host metrics
    pub fn with_host_metrics(config: ResourceConfig) -> Self {
        let source = Arc::new(SysinfoMetrics::new(config.network_capacity_mbps));
        Self::new(config, source)
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Registers an extra pool, replacing any pool with the same name
    pub fn add_pool(&self, service: &str, config: PoolConfig) {
        self.pools
            .insert(service.to_string(), Arc::new(ConnectionPool::new(service, config)));
    }

    pub fn pool(&self, service: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.get(service).map(|p| p.clone())
    }

    fn fits(&self, allocation: &ResourceAllocation, reserved: &Reservations, free_memory_mb: u64) -> bool {
        let free = free_memory_mb.saturating_sub(reserved.memory_mb) as f64;
        if allocation.memory_mb as f64 > free * self.config.memory_headroom {
            return false;
        }
        let remaining = self.config.max_total_connections.saturating_sub(reserved.connections);
        allocation.max_connections <= remaining
    }

    /// Grants a budget for `query_id`, halving it once if capacity is short.
    ///
    /// Only fails when `strict_admission` is set and the reduced budget still
    /// does not fit.
    pub fn allocate(
        &self,
        query_id: &str,
        complexity: QueryComplexity,
        overrides: Option<&ResourceOverrides>,
    ) -> Result<ResourceAllocation> {
        let mut allocation = ResourceAllocation::new(query_id, complexity);
        allocation.grant = self.next_grant.fetch_add(1, Ordering::Relaxed);
        if let Some(overrides) = overrides {
            allocation.apply_overrides(overrides);
        }

        // a repeated id replaces the earlier grant
        self.release(query_id);

        let free_memory_mb = self.source.sample().available_memory_mb;
        let mut reserved = self.reservations.lock();

        if !self.fits(&allocation, &reserved, free_memory_mb) {
            warn!(query_id = %query_id, complexity = %complexity, "Insufficient resources, reducing allocation");
            allocation.reduce();
            counter!("resilience.resources.reduced_allocations", 1);

            if self.config.strict_admission && !self.fits(&allocation, &reserved, free_memory_mb) {
                return Err(ResilienceError::InsufficientCapacity {
                    query_id: query_id.to_string(),
                    memory_mb: allocation.memory_mb,
                    connections: allocation.max_connections,
                });
            }
        }

        reserved.memory_mb += allocation.memory_mb;
        reserved.connections += allocation.max_connections;
        gauge!("resilience.resources.allocated_memory_mb", reserved.memory_mb as f64);
        gauge!("resilience.resources.reserved_connections", reserved.connections as f64);
        self.allocations.insert(query_id.to_string(), allocation.clone());
        drop(reserved);

        debug!(
            query_id = %query_id,
            memory_mb = allocation.memory_mb,
            connections = allocation.max_connections,
            priority = %allocation.priority,
            "Allocated resources"
        );
        Ok(allocation)
    }

    /// Like [`allocate`](Self::allocate) but released when the guard drops
    pub fn allocate_scoped(
        self: &Arc<Self>,
        query_id: &str,
        complexity: QueryComplexity,
        overrides: Option<&ResourceOverrides>,
    ) -> Result<ResourceGuard> {
        let allocation = self.allocate(query_id, complexity, overrides)?;
        Ok(ResourceGuard {
            allocator: Arc::clone(self),
            allocation,
            released: false,
        })
    }

    /// Returns the budget to the pool; unknown ids are ignored
    pub fn release(&self, query_id: &str) -> Option<ResourceAllocation> {
        let (_, allocation) = self.allocations.remove(query_id)?;
        Some(self.unreserve(allocation))
    }

    /// Releases `query_id` only while it still holds the given grant
    fn release_grant(&self, query_id: &str, grant: u64) -> Option<ResourceAllocation> {
        let (_, allocation) = self.allocations.remove_if(query_id, |_, a| a.grant == grant)?;
        Some(self.unreserve(allocation))
    }

    fn unreserve(&self, allocation: ResourceAllocation) -> ResourceAllocation {
        let mut reserved = self.reservations.lock();
        reserved.memory_mb = reserved.memory_mb.saturating_sub(allocation.memory_mb);
        reserved.connections = reserved.connections.saturating_sub(allocation.max_connections);
        gauge!("resilience.resources.allocated_memory_mb", reserved.memory_mb as f64);
        gauge!("resilience.resources.reserved_connections", reserved.connections as f64);
        drop(reserved);

        debug!(query_id = %allocation.query_id, memory_mb = allocation.memory_mb, "Released resources");
        allocation
    }

    pub fn allocation(&self, query_id: &str) -> Option<ResourceAllocation> {
        self.allocations.get(query_id).map(|a| a.clone())
    }

    pub fn active_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub async fn get_connection(&self, service: &str) -> Result<ConnectionHandle> {
        let pool = self
            .pool(service)
            .ok_or_else(|| ResilienceError::unknown_dependency(service))?;
        let handle = pool.get_connection().await?;
        counter!("resilience.pool.acquired", 1, "service" => service.to_string());
        Ok(handle)
    }

    /// Scoped checkout; the handle goes back to its pool when dropped
    pub async fn acquire_connection(&self, service: &str) -> Result<PooledConnection> {
        let pool = self
            .pool(service)
            .ok_or_else(|| ResilienceError::unknown_dependency(service))?;
        let connection = pool.acquire().await?;
        counter!("resilience.pool.acquired", 1, "service" => service.to_string());
        Ok(connection)
    }

    pub fn return_connection(&self, service: &str, handle: ConnectionHandle) -> Result<()> {
        let pool = self
            .pool(service)
            .ok_or_else(|| ResilienceError::unknown_dependency(service))?;
        pool.return_connection(handle);
        Ok(())
    }

    /// Expands busy pools, shrinks quiet ones and reclaims idle handles
    pub fn rebalance_pools(&self) {
        for pool in self.pools.iter() {
            let stats = pool.stats();
            if stats.utilization > self.config.expand_utilization && stats.current_size < stats.max_size {
                pool.expand();
                debug!(service = %stats.service, size = pool.stats().current_size, "Expanded connection pool");
            } else if stats.utilization < self.config.shrink_utilization && stats.current_size > stats.min_size {
                pool.shrink();
                debug!(service = %stats.service, size = pool.stats().current_size, "Shrunk connection pool");
            }

            let closed = pool.cleanup_idle(self.config.idle_timeout);
            if closed > 0 {
                debug!(service = %stats.service, closed, "Reclaimed idle connections");
            }
            gauge!("resilience.pool.size", pool.stats().current_size as f64, "service" => stats.service.clone());
        }
    }

    /// Releases allocations that outlived their timeout plus the grace period
    pub fn sweep_orphans(&self) -> Vec<String> {
        let expired: Vec<(String, u64)> = self
            .allocations
            .iter()
            .filter(|a| a.age() > a.timeout + self.config.orphan_grace)
            .map(|a| (a.key().clone(), a.grant))
            .collect();

        let mut released = Vec::with_capacity(expired.len());
        for (query_id, grant) in expired {
            if self.release_grant(&query_id, grant).is_some() {
                warn!(query_id = %query_id, "Released orphaned allocation");
                counter!("resilience.resources.orphans_released", 1);
                released.push(query_id);
            }
        }
        released
    }

    /// Frees what it can when memory usage is above the threshold. Leaked
    /// budgets go first; if usage is still high every pool drops its idle
    /// handles down to its minimum.
    pub fn optimize_memory(&self) -> MemoryOptimization {
        let usage = self.source.sample().memory;
        let mut outcome = MemoryOptimization {
            memory_usage: usage,
            orphans_released: 0,
            aggressive: false,
            connections_closed: 0,
        };

        if usage <= self.config.gc_threshold {
            debug!(memory_usage = usage, "Memory usage within threshold");
            return outcome;
        }

        info!(memory_usage = usage, "Memory usage above threshold, optimizing");
        outcome.orphans_released = self.sweep_orphans().len();

        let usage = self.source.sample().memory;
        outcome.memory_usage = usage;
        if usage > self.config.gc_threshold {
            warn!(memory_usage = usage, "Performing aggressive memory optimization");
            outcome.aggressive = true;
            outcome.connections_closed = self.pools.iter().map(|p| p.reduce_size()).sum();
            info!(closed = outcome.connections_closed, "Aggressive memory optimization completed");
        }
        outcome
    }

    /// Samples the host now
    pub fn current_load(&self) -> LoadSample {
        let host = self.source.sample();
        let mut sample = LoadSample::new(host.cpu, host.memory, host.network);
        sample.active_connections = self.pools.iter().map(|p| p.stats().in_use as u32).sum();
        sample.active_queries = self.allocations.len();
        sample
    }

    pub fn latest_load(&self) -> Option<LoadSample> {
        self.scaling.lock().latest().cloned()
    }

    /// Records a load sample and applies a new recommendation to every pool.
    /// Returns the recommendation only when it changed.
    pub fn analyze_scaling(&self) -> Option<ScalingRecommendation> {
        let sample = self.current_load();
        gauge!("resilience.resources.cpu", sample.cpu);
        gauge!("resilience.resources.memory", sample.memory);

        let recommendation = {
            let mut analyzer = self.scaling.lock();
            analyzer.record(sample);
            analyzer.recommend()?
        };

        {
            let mut last = self.last_recommendation.lock();
            if last.as_ref() == Some(&recommendation) {
                return None;
            }
            *last = Some(recommendation.clone());
        }

        info!(recommendation = %recommendation, "New scaling recommendation");
        for pool in self.pools.iter() {
            pool.scale(recommendation.factor);
        }
        Some(recommendation)
    }

    pub fn last_recommendation(&self) -> Option<ScalingRecommendation> {
        self.last_recommendation.lock().clone()
    }

    pub fn stats(&self) -> ResourceStats {
        let pools: BTreeMap<String, PoolStats> = self
            .pools
            .iter()
            .map(|p| (p.key().clone(), p.stats()))
            .collect();
        let active_connections = pools.values().map(|s| s.in_use).sum();
        let reserved = self.reservations.lock();

        ResourceStats {
            pools,
            active_allocations: self.allocations.len(),
            allocated_memory_mb: reserved.memory_mb,
            reserved_connections: reserved.connections,
            active_connections,
            latest_load: self.latest_load(),
            last_recommendation: self.last_recommendation(),
        }
    }

    fn schedule<F, Fut>(self: &Arc<Self>, name: &str, period: Duration, job: F) -> PeriodicTask
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let job = Arc::new(job);
        PeriodicTask::spawn(name, period, move || {
            let weak = weak.clone();
            let job = job.clone();
            async move {
                match weak.upgrade() {
                    Some(allocator) => {
                        job(allocator).await;
                        true
                    }
                    None => false,
                }
            }
        })
    }

    /// Starts the background jobs; a second call is a no-op
    pub fn start(self: &Arc<Self>) {
        if !self.config.optimization_enabled {
            info!("Resource optimization disabled");
            return;
        }
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        tasks.push(self.schedule(
            "memory-optimization",
            self.config.memory_optimization_interval,
            |allocator| async move {
                allocator.optimize_memory();
            },
        ));
        tasks.push(self.schedule(
            "pool-rebalance",
            self.config.pool_optimization_interval,
            |allocator| async move {
                allocator.rebalance_pools();
                allocator.sweep_orphans();
            },
        ));
        tasks.push(self.schedule(
            "scaling-analysis",
            self.config.scaling_interval,
            |allocator| async move {
                allocator.analyze_scaling();
            },
        ));
        info!("Resource optimization started");
    }

    pub async fn stop(&self) {
        let tasks: Vec<PeriodicTask> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.shutdown().await;
        }
        if !tasks.is_empty() {
            info!("Resource optimization stopped");
        }
    }
}

impl std::fmt::Debug for ResourceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAllocator")
            .field("pools", &self.pools.len())
            .field("allocations", &self.allocations.len())
            .finish()
    }
}

/// Scoped allocation, released on drop
#[derive(Debug)]
pub struct ResourceGuard {
    allocator: Arc<ResourceAllocator>,
    allocation: ResourceAllocation,
    released: bool,
}

impl ResourceGuard {
    pub fn allocation(&self) -> &ResourceAllocation {
        &self.allocation
    }

    pub fn timeout(&self) -> Duration {
        self.allocation.timeout
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.allocator
                .release_grant(&self.allocation.query_id, self.allocation.grant);
        }
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator_with(source: Arc<FixedMetrics>) -> Arc<ResourceAllocator> {
        Arc::new(ResourceAllocator::new(ResourceConfig::default(), source))
    }

    #[test]
    fn test_default_pools() {
        let allocator = allocator_with(Arc::new(FixedMetrics::default()));
        let stats = allocator.stats();
        assert_eq!(stats.pools.len(), 6);
        assert_eq!(stats.pools["llm_api"].current_size, 10);
        assert_eq!(stats.pools["customs_api"].max_size, 10);
    }

    #[test]
    fn test_allocate_and_release() {
        let allocator = allocator_with(Arc::new(FixedMetrics::default()));
        let allocation = allocator.allocate("q1", QueryComplexity::High, None).unwrap();
        assert_eq!(allocation.memory_mb, 200);
        assert!(!allocation.reduced);
        assert_eq!(allocator.stats().allocated_memory_mb, 200);

        assert!(allocator.release("q1").is_some());
        assert!(allocator.release("q1").is_none());
        assert_eq!(allocator.stats().allocated_memory_mb, 0);
    }

    #[test]
    fn test_reduces_under_memory_pressure() {
        // 400MB free, 80% headroom = 320MB
        let allocator = allocator_with(Arc::new(FixedMetrics::new(0.5, 0.9, 0.0, 400)));
        let allocation = allocator.allocate("q1", QueryComplexity::Critical, None).unwrap();
        assert!(allocation.reduced);
        assert_eq!(allocation.memory_mb, 250);
        assert_eq!(allocation.max_connections, 4);
    }

    #[test]
    fn test_strict_admission_rejects() {
        let config = ResourceConfig {
            strict_admission: true,
            ..ResourceConfig::default()
        };
        let allocator = ResourceAllocator::new(config, Arc::new(FixedMetrics::new(0.5, 0.9, 0.0, 100)));
        let err = allocator.allocate("q1", QueryComplexity::Critical, None).unwrap_err();
        assert!(matches!(err, ResilienceError::InsufficientCapacity { .. }));
        assert_eq!(allocator.active_allocations(), 0);
    }

    #[test]
    fn test_connection_ceiling_counts_live_allocations() {
        let config = ResourceConfig {
            max_total_connections: 10,
            ..ResourceConfig::default()
        };
        let allocator = ResourceAllocator::new(config, Arc::new(FixedMetrics::default()));
        let first = allocator.allocate("q1", QueryComplexity::Critical, None).unwrap();
        assert!(!first.reduced);
        let second = allocator.allocate("q2", QueryComplexity::Medium, None).unwrap();
        assert!(second.reduced);
        assert_eq!(second.max_connections, 1);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let allocator = allocator_with(Arc::new(FixedMetrics::default()));
        {
            let guard = allocator.allocate_scoped("q1", QueryComplexity::Low, None).unwrap();
            assert_eq!(guard.allocation().memory_mb, 50);
            assert_eq!(allocator.active_allocations(), 1);
        }
        assert_eq!(allocator.active_allocations(), 0);
        assert_eq!(allocator.stats().reserved_connections, 0);
    }

    #[test]
    fn test_stale_guard_keeps_replacement_grant() {
        let allocator = allocator_with(Arc::new(FixedMetrics::default()));
        let first = allocator.allocate_scoped("q1", QueryComplexity::Low, None).unwrap();
        let second = allocator.allocate_scoped("q1", QueryComplexity::High, None).unwrap();
        assert_eq!(allocator.active_allocations(), 1);
        assert_eq!(allocator.stats().allocated_memory_mb, 200);

        drop(first);
        assert_eq!(allocator.allocation("q1").map(|a| a.memory_mb), Some(200));
        assert_eq!(allocator.stats().allocated_memory_mb, 200);

        drop(second);
        assert_eq!(allocator.active_allocations(), 0);
        assert_eq!(allocator.stats().allocated_memory_mb, 0);
        assert_eq!(allocator.stats().reserved_connections, 0);
    }

    #[tokio::test]
    async fn test_rebalance_grows_busy_and_shrinks_quiet_pools() {
        let allocator = allocator_with(Arc::new(FixedMetrics::default()));
        allocator.pool("cache").unwrap().expand();

        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(allocator.acquire_connection("customs_api").await.unwrap());
        }
        assert_eq!(allocator.stats().pools["customs_api"].utilization, 1.0);

        allocator.rebalance_pools();

        let stats = allocator.stats();
        assert_eq!(stats.pools["customs_api"].current_size, 4);
        assert_eq!(stats.pools["customs_api"].in_use, 3);
        assert_eq!(stats.pools["cache"].current_size, 5);
        assert_eq!(stats.pools["llm_api"].current_size, 10);

        drop(held);
        assert_eq!(allocator.stats().pools["customs_api"].in_use, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebalance_reclaims_idle_connections() {
        let allocator = allocator_with(Arc::new(FixedMetrics::default()));
        let pool = allocator.pool("tariff_api").unwrap();
        for _ in 0..3 {
            pool.expand();
        }
        assert_eq!(pool.stats().current_size, 8);

        allocator.rebalance_pools();
        assert_eq!(pool.stats().current_size, 7);

        tokio::time::advance(Duration::from_secs(11 * 60)).await;
        allocator.rebalance_pools();
        assert_eq!(pool.stats().current_size, 5);
    }

    #[tokio::test]
    async fn test_unknown_pool() {
        let allocator = allocator_with(Arc::new(FixedMetrics::default()));
        let err = allocator.get_connection("ftp").await.unwrap_err();
        assert!(matches!(err, ResilienceError::UnknownDependency(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphans_swept_after_timeout() {
        let allocator = allocator_with(Arc::new(FixedMetrics::default()));
        allocator.allocate("leaked", QueryComplexity::Low, None).unwrap();
        allocator.allocate("fresh", QueryComplexity::Critical, None).unwrap();

        tokio::time::advance(Duration::from_secs(30 + 61)).await;
        assert_eq!(allocator.sweep_orphans(), vec!["leaked".to_string()]);
        assert!(allocator.allocation("fresh").is_some());
    }

    #[test]
    fn test_scaling_applied_once() {
        let source = Arc::new(FixedMetrics::new(0.95, 0.5, 0.0, 8192));
        let allocator = allocator_with(source.clone());

        for _ in 0..4 {
            assert!(allocator.analyze_scaling().is_none());
        }
        let recommendation = allocator.analyze_scaling().unwrap();
        assert_eq!(recommendation.action, ScalingAction::ScaleUp);
        assert_eq!(recommendation.factor, 2.0);
        assert_eq!(allocator.stats().pools["tariff_api"].current_size, 10);

        // same recommendation again is not re-applied
        assert!(allocator.analyze_scaling().is_none());
        assert_eq!(allocator.stats().pools["tariff_api"].current_size, 10);
    }

    #[test]
    fn test_aggressive_memory_optimization() {
        let source = Arc::new(FixedMetrics::new(0.2, 0.95, 0.0, 8192));
        let allocator = allocator_with(source);
        allocator.pool("cache").unwrap().expand();

        let outcome = allocator.optimize_memory();
        assert!(outcome.aggressive);
        assert_eq!(outcome.connections_closed, 1);
        assert_eq!(allocator.stats().pools["cache"].current_size, 5);
    }
}
