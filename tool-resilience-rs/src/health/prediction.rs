//! Heuristic near-term failure risk.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::metrics::{ExecutionRecord, RingBuffer};

/// Records kept for failure prediction
pub const PREDICTION_WINDOW: usize = 20;
/// Fewer samples than this is reported as low risk with insufficient data
pub const MIN_PREDICTION_SAMPLES: usize = 10;

const HIGH_RISK_RATE: f64 = 0.5;
const MEDIUM_RISK_RATE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePrediction {
    pub risk: RiskLevel,
    pub failure_rate: f64,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct FailurePredictor {
    history: RingBuffer<ExecutionRecord>,
}

impl Default for FailurePredictor {
    fn default() -> Self {
        Self::new(PREDICTION_WINDOW)
    }
}

impl FailurePredictor {
    pub fn new(window: usize) -> Self {
        Self {
            history: RingBuffer::new(window),
        }
    }

    pub fn record(&mut self, record: ExecutionRecord) {
        self.history.push(record);
    }

    pub fn predict(&self) -> FailurePrediction {
        if self.history.len() < MIN_PREDICTION_SAMPLES {
            return FailurePrediction {
                risk: RiskLevel::Low,
                failure_rate: 0.0,
                description: "Insufficient data for prediction".to_string(),
            };
        }

        let failures = self.history.iter().filter(|r| !r.success).count();
        let failure_rate = failures as f64 / self.history.len() as f64;

        let (older, newer) = self.history.halves();
        let older_failures = older.iter().filter(|r| !r.success).count();
        let newer_failures = newer.iter().filter(|r| !r.success).count();
        let increasing = newer_failures > older_failures;

        let (risk, description) = if failure_rate > HIGH_RISK_RATE {
            (
                RiskLevel::High,
                format!("High failure rate detected: {:.1}%", failure_rate * 100.0),
            )
        } else if increasing {
            (RiskLevel::Medium, "Increasing failure trend detected".to_string())
        } else if failure_rate > MEDIUM_RISK_RATE {
            (
                RiskLevel::Medium,
                format!("Moderate failure rate: {:.1}%", failure_rate * 100.0),
            )
        } else {
            (RiskLevel::Low, "Tool performing normally".to_string())
        };

        FailurePrediction {
            risk,
            failure_rate,
            description,
        }
    }
}
