//! System-wide totals and per-tool alert history.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alerts retained per tool
pub const MAX_ALERTS_PER_TOOL: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Degradation,
    Critical,
    AutoDisabled,
    Slow,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertLevel::Degradation => "DEGRADATION",
            AlertLevel::Critical => "CRITICAL",
            AlertLevel::AutoDisabled => "AUTO_DISABLED",
            AlertLevel::Slow => "SLOW",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub tool: String,
    pub level: AlertLevel,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl fmt::Display for HealthAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

#[derive(Debug)]
pub struct SystemDashboard {
    total_executions: u64,
    total_failures: u64,
    total_execution_ms: u64,
    alerts: HashMap<String, VecDeque<HealthAlert>>,
    last_updated: DateTime<Utc>,
}

impl Default for SystemDashboard {
    fn default() -> Self {
        Self {
            total_executions: 0,
            total_failures: 0,
            total_execution_ms: 0,
            alerts: HashMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// Serializable view of the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub total_executions: u64,
    pub total_failures: u64,
    pub system_success_rate: f64,
    pub average_execution_ms: u64,
    pub alerts: HashMap<String, Vec<String>>,
    pub last_updated: DateTime<Utc>,
}

impl SystemDashboard {
    pub fn record_success(&mut self, duration: Duration) {
        self.total_executions += 1;
        self.total_execution_ms = self
            .total_execution_ms
            .saturating_add(duration.as_millis() as u64);
        self.last_updated = Utc::now();
    }

    pub fn record_failure(&mut self) {
        self.total_executions += 1;
        self.total_failures += 1;
        self.last_updated = Utc::now();
    }

    pub fn raise(&mut self, tool: &str, level: AlertLevel, message: impl Into<String>) -> HealthAlert {
        let alert = HealthAlert {
            tool: tool.to_string(),
            level,
            message: message.into(),
            raised_at: Utc::now(),
        };
        let queue = self.alerts.entry(tool.to_string()).or_default();
        if queue.len() == MAX_ALERTS_PER_TOOL {
            queue.pop_front();
        }
        queue.push_back(alert.clone());
        self.last_updated = alert.raised_at;
        alert
    }

    pub fn alerts_for(&self, tool: &str) -> Vec<HealthAlert> {
        self.alerts
            .get(tool)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn system_success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            1.0
        } else {
            (self.total_executions - self.total_failures) as f64 / self.total_executions as f64
        }
    }

    pub fn average_execution_ms(&self) -> u64 {
        let successes = self.total_executions - self.total_failures;
        if successes == 0 {
            0
        } else {
            self.total_execution_ms / successes
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            total_executions: self.total_executions,
            total_failures: self.total_failures,
            system_success_rate: self.system_success_rate(),
            average_execution_ms: self.average_execution_ms(),
            alerts: self
                .alerts
                .iter()
                .map(|(tool, queue)| (tool.clone(), queue.iter().map(ToString::to_string).collect()))
                .collect(),
            last_updated: self.last_updated,
        }
    }
}
