//! Per-request resource budgets.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Hard cap for a memory override
pub const MAX_MEMORY_MB: u64 = 1000;
/// Hard cap for a connection override
pub const MAX_CONNECTIONS: u32 = 10;
/// Hard cap for a timeout override
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

const MIN_REDUCED_MEMORY_MB: u64 = 25;
const MIN_REDUCED_CONNECTIONS: u32 = 1;
const MIN_REDUCED_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryComplexity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourcePriority {
    Low,
    Normal,
    High,
    Critical,
}

impl fmt::Display for QueryComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueryComplexity::Low => "LOW",
            QueryComplexity::Medium => "MEDIUM",
            QueryComplexity::High => "HIGH",
            QueryComplexity::Critical => "CRITICAL",
        };
        write!(f, "{}", label)
    }
}

impl fmt::Display for ResourcePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourcePriority::Low => "LOW",
            ResourcePriority::Normal => "NORMAL",
            ResourcePriority::High => "HIGH",
            ResourcePriority::Critical => "CRITICAL",
        };
        write!(f, "{}", label)
    }
}

/// Default budget for a complexity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierBudget {
    pub memory_mb: u64,
    pub max_connections: u32,
    pub timeout: Duration,
    pub priority: ResourcePriority,
}

impl QueryComplexity {
    pub fn budget(self) -> TierBudget {
        let (memory_mb, max_connections, secs, priority) = match self {
            QueryComplexity::Low => (50, 2, 30, ResourcePriority::Normal),
            QueryComplexity::Medium => (100, 3, 60, ResourcePriority::High),
            QueryComplexity::High => (200, 5, 120, ResourcePriority::High),
            QueryComplexity::Critical => (500, 8, 300, ResourcePriority::Critical),
        };
        TierBudget {
            memory_mb,
            max_connections,
            timeout: Duration::from_secs(secs),
            priority,
        }
    }
}

/// Caller-requested adjustments; zero values are ignored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOverrides {
    pub memory_mb: Option<u64>,
    pub max_connections: Option<u32>,
    pub timeout: Option<Duration>,
}

impl ResourceOverrides {
    pub fn memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Budget granted to one in-flight request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceAllocation {
    pub query_id: String,
    pub complexity: QueryComplexity,
    pub memory_mb: u64,
    pub max_connections: u32,
    pub timeout: Duration,
    pub priority: ResourcePriority,
    pub created_at: DateTime<Utc>,
    /// Set when admission had to halve the budget
    pub reduced: bool,
    #[serde(skip)]
    pub(crate) granted_at: Instant,
    /// Distinguishes successive grants under the same query id
    #[serde(skip)]
    pub(crate) grant: u64,
}

impl ResourceAllocation {
    pub fn new(query_id: impl Into<String>, complexity: QueryComplexity) -> Self {
        let budget = complexity.budget();
        Self {
            query_id: query_id.into(),
            complexity,
            memory_mb: budget.memory_mb,
            max_connections: budget.max_connections,
            timeout: budget.timeout,
            priority: budget.priority,
            created_at: Utc::now(),
            reduced: false,
            granted_at: Instant::now(),
            grant: 0,
        }
    }

    /// Applies positive overrides, clamped to the hard caps
    pub fn apply_overrides(&mut self, overrides: &ResourceOverrides) {
        if let Some(memory_mb) = overrides.memory_mb.filter(|m| *m > 0) {
            self.memory_mb = memory_mb.min(MAX_MEMORY_MB);
        }
        if let Some(connections) = overrides.max_connections.filter(|c| *c > 0) {
            self.max_connections = connections.min(MAX_CONNECTIONS);
        }
        if let Some(timeout) = overrides.timeout.filter(|t| !t.is_zero()) {
            self.timeout = timeout.min(MAX_TIMEOUT);
        }
    }

    /// Halves every budget once, keeping a usable floor
    pub fn reduce(&mut self) {
        self.memory_mb = (self.memory_mb / 2).max(MIN_REDUCED_MEMORY_MB);
        self.max_connections = (self.max_connections / 2).max(MIN_REDUCED_CONNECTIONS);
        self.timeout = (self.timeout / 2).max(MIN_REDUCED_TIMEOUT);
        self.reduced = true;
    }

    /// Time since the allocation was granted
    pub fn age(&self) -> Duration {
        self.granted_at.elapsed()
    }
}
