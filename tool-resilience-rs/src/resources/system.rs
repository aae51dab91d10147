//! Host resource sampling.

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Networks, System};

/// Utilizations in [0, 1] plus free memory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub cpu: f64,
    pub memory: f64,
    pub network: f64,
    pub available_memory_mb: u64,
}

/// Where load numbers come from
pub trait SystemMetricsSource: Send + Sync {
    fn sample(&self) -> HostMetrics;
}

/// Reads the real host through `sysinfo`
pub struct SysinfoMetrics {
    inner: Mutex<SysinfoState>,
    /// Link capacity used to turn byte counts into a utilization
    network_capacity_bytes_per_sec: f64,
}

struct SysinfoState {
    system: System,
    networks: Networks,
    last_poll: Instant,
}

impl SysinfoMetrics {
    pub fn new(network_capacity_mbps: u64) -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        let networks = Networks::new_with_refreshed_list();

        Self {
            inner: Mutex::new(SysinfoState {
                system,
                networks,
                last_poll: Instant::now(),
            }),
            network_capacity_bytes_per_sec: (network_capacity_mbps.max(1) as f64) * 1_000_000.0 / 8.0,
        }
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl SystemMetricsSource for SysinfoMetrics {
    fn sample(&self) -> HostMetrics {
        let mut state = self.inner.lock();
        state.system.refresh_cpu_usage();
        state.system.refresh_memory();
        state.networks.refresh(true);

        let cpu = (state.system.global_cpu_usage() as f64 / 100.0).clamp(0.0, 1.0);

        let total = state.system.total_memory();
        let memory = if total > 0 {
            (state.system.used_memory() as f64 / total as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let available_memory_mb = state.system.available_memory() / (1024 * 1024);

        // bytes moved since the previous refresh, summed across interfaces
        let moved: u64 = state
            .networks
            .iter()
            .map(|(_, data)| data.received() + data.transmitted())
            .sum();
        let elapsed = state.last_poll.elapsed().as_secs_f64().max(1.0);
        state.last_poll = Instant::now();
        let network = (moved as f64 / (self.network_capacity_bytes_per_sec * elapsed)).clamp(0.0, 1.0);

        HostMetrics {
            cpu,
            memory,
            network,
            available_memory_mb,
        }
    }
}

/// Settable readings, for tests and embedders with their own telemetry
#[derive(Debug)]
pub struct FixedMetrics {
    metrics: Mutex<HostMetrics>,
}

impl FixedMetrics {
    pub fn new(cpu: f64, memory: f64, network: f64, available_memory_mb: u64) -> Self {
        Self {
            metrics: Mutex::new(HostMetrics {
                cpu,
                memory,
                network,
                available_memory_mb,
            }),
        }
    }

    pub fn set(&self, metrics: HostMetrics) {
        *self.metrics.lock() = metrics;
    }

    pub fn set_load(&self, cpu: f64, memory: f64, network: f64) {
        let mut current = self.metrics.lock();
        current.cpu = cpu;
        current.memory = memory;
        current.network = network;
    }
}

impl Default for FixedMetrics {
    fn default() -> Self {
        Self::new(0.2, 0.3, 0.1, 16 * 1024)
    }
}

impl SystemMetricsSource for FixedMetrics {
    fn sample(&self) -> HostMetrics {
        *self.metrics.lock()
    }
}
