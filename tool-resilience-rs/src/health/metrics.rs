//! Per-tool execution counters and recent history.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Success rate below which a tool is critical
pub const CRITICAL_THRESHOLD: f64 = 0.5;
/// Success rate below which a tool is degraded
pub const DEGRADATION_THRESHOLD: f64 = 0.7;
/// Success rate required to count as healthy
pub const HEALTHY_THRESHOLD: f64 = 0.8;
/// Average latency above which a tool is slow
pub const SLOW_THRESHOLD_MS: u64 = 10_000;

/// Coarse classification of an error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Timeout,
    Connection,
    RateLimit,
    Validation,
    NotFound,
    Unauthorized,
    Other,
}

impl ErrorCategory {
    /// Categorizes by case-insensitive substring, first match wins
    pub fn categorize(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") {
            ErrorCategory::Timeout
        } else if lower.contains("connection") {
            ErrorCategory::Connection
        } else if lower.contains("rate limit") {
            ErrorCategory::RateLimit
        } else if lower.contains("validation") {
            ErrorCategory::Validation
        } else if lower.contains("not found") {
            ErrorCategory::NotFound
        } else if lower.contains("unauthorized") {
            ErrorCategory::Unauthorized
        } else {
            ErrorCategory::Other
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Connection => "CONNECTION",
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::Unauthorized => "UNAUTHORIZED",
            ErrorCategory::Other => "OTHER",
        };
        write!(f, "{}", label)
    }
}

/// One completed tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn success(duration: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            duration,
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            duration: Duration::ZERO,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Fixed-capacity buffer that evicts the oldest entry
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Splits into (older half, newer half); the newer half gets the odd one
    pub fn halves(&self) -> (Vec<&T>, Vec<&T>) {
        let mid = self.items.len() / 2;
        let older = self.items.iter().take(mid).collect();
        let newer = self.items.iter().skip(mid).collect();
        (older, newer)
    }
}

/// Running counters for one tool
#[derive(Debug, Clone)]
pub struct ToolMetrics {
    success_count: u64,
    failure_count: u64,
    total_execution_ms: u64,
    min_execution_ms: Option<u64>,
    max_execution_ms: u64,
    slow_execution_count: u64,
    recent: RingBuffer<ExecutionRecord>,
    error_patterns: HashMap<ErrorCategory, u64>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ToolMetrics {
    pub fn new(history: usize) -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            total_execution_ms: 0,
            min_execution_ms: None,
            max_execution_ms: 0,
            slow_execution_count: 0,
            recent: RingBuffer::new(history),
            error_patterns: HashMap::new(),
            last_error: None,
            last_error_at: None,
            last_success_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn record_success(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.success_count += 1;
        self.total_execution_ms = self.total_execution_ms.saturating_add(ms);
        self.last_success_at = Some(Utc::now());
        self.min_execution_ms = Some(self.min_execution_ms.map_or(ms, |min| min.min(ms)));
        self.max_execution_ms = self.max_execution_ms.max(ms);
        if ms > SLOW_THRESHOLD_MS {
            self.slow_execution_count += 1;
        }
        self.recent.push(ExecutionRecord::success(duration));
    }

    pub fn record_failure(&mut self, error: &str) {
        self.failure_count += 1;
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(Utc::now());
        *self
            .error_patterns
            .entry(ErrorCategory::categorize(error))
            .or_insert(0) += 1;
        self.recent.push(ExecutionRecord::failure(error));
    }

    pub fn total_executions(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// 1.0 when nothing has been recorded
    pub fn success_rate(&self) -> f64 {
        let total = self.total_executions();
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// Mean over successful executions only
    pub fn average_latency_ms(&self) -> u64 {
        if self.success_count == 0 {
            0
        } else {
            self.total_execution_ms / self.success_count
        }
    }

    /// 95th percentile over successful executions in the recent history
    pub fn p95_latency_ms(&self) -> u64 {
        let mut samples: Vec<u64> = self
            .recent
            .iter()
            .filter(|r| r.success)
            .map(|r| r.duration.as_millis() as u64)
            .collect();
        if samples.is_empty() {
            return 0;
        }
        samples.sort_unstable();
        let rank = ((samples.len() as f64) * 0.95).ceil() as usize;
        samples[rank.saturating_sub(1).min(samples.len() - 1)]
    }

    pub fn min_latency_ms(&self) -> u64 {
        self.min_execution_ms.unwrap_or(0)
    }

    pub fn max_latency_ms(&self) -> u64 {
        self.max_execution_ms
    }

    pub fn slow_execution_count(&self) -> u64 {
        self.slow_execution_count
    }

    pub fn error_patterns(&self) -> &HashMap<ErrorCategory, u64> {
        &self.error_patterns
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        self.last_error_at
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn recent(&self) -> &RingBuffer<ExecutionRecord> {
        &self.recent
    }

    /// High enough success rate and the latest event was a success
    pub fn is_healthy(&self) -> bool {
        let recovered = match (self.last_error_at, self.last_success_at) {
            (None, _) => true,
            (Some(error_at), Some(success_at)) => success_at > error_at,
            (Some(_), None) => false,
        };
        self.success_rate() >= HEALTHY_THRESHOLD && recovered
    }

    /// Human-readable status line
    pub fn status_text(&self) -> String {
        let rate = self.success_rate();
        let avg = self.average_latency_ms();

        if !self.is_healthy() {
            if rate < CRITICAL_THRESHOLD {
                return format!("CRITICAL: Success rate {:.1}%", rate * 100.0);
            }
            if rate < DEGRADATION_THRESHOLD {
                return format!("DEGRADED: Success rate {:.1}%", rate * 100.0);
            }
            if avg > SLOW_THRESHOLD_MS {
                return format!("SLOW: Average response time {}ms", avg);
            }
            if let Some(error) = &self.last_error {
                return format!("ERROR: {}", error);
            }
            return "UNHEALTHY".to_string();
        }

        if avg > SLOW_THRESHOLD_MS / 2 {
            "HEALTHY (Slow)".to_string()
        } else {
            "HEALTHY".to_string()
        }
    }
}
