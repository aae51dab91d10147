//! Tool health tracking: metrics, trend, failure prediction, availability
//! and the monitor that ties them together.

pub mod availability;
pub mod dashboard;
pub mod metrics;
pub mod monitor;
pub mod prediction;
pub mod trend;

pub use availability::{AvailabilityManager, AvailabilityState, FailureEffect};
pub use dashboard::{AlertLevel, DashboardSnapshot, HealthAlert, SystemDashboard};
pub use metrics::{ErrorCategory, ExecutionRecord, RingBuffer, ToolMetrics};
pub use monitor::{HealthCheckReport, HealthMonitor, HealthMonitorConfig, ToolHealthSnapshot};
pub use prediction::{FailurePrediction, FailurePredictor, RiskLevel};
pub use trend::{Trend, TrendAnalysis, TrendAnalyzer};
