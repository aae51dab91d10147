//! Rolling load window and advisory scaling recommendations.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Samples kept in the rolling window
pub const SCALING_WINDOW: usize = 30;
/// Samples required before any recommendation
pub const MIN_SCALING_SAMPLES: usize = 5;

const SCALE_DOWN_CPU: f64 = 0.3;
const SCALE_DOWN_MEMORY: f64 = 0.4;
const SCALE_DOWN_FACTOR: f64 = 0.8;

/// One observation of host load, all utilizations in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub timestamp: DateTime<Utc>,
    pub cpu: f64,
    pub memory: f64,
    pub network: f64,
    pub active_connections: u32,
    pub active_queries: usize,
}

impl LoadSample {
    pub fn new(cpu: f64, memory: f64, network: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            cpu: cpu.clamp(0.0, 1.0),
            memory: memory.clamp(0.0, 1.0),
            network: network.clamp(0.0, 1.0),
            active_connections: 0,
            active_queries: 0,
        }
    }

    /// Remaining headroom, driven by the busiest resource
    pub fn available_capacity(&self) -> f64 {
        1.0 - self.cpu.max(self.memory).max(self.network)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRecommendation {
    pub action: ScalingAction,
    pub reason: String,
    pub factor: f64,
}

impl fmt::Display for ScalingRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            ScalingAction::ScaleUp => "SCALE_UP",
            ScalingAction::ScaleDown => "SCALE_DOWN",
        };
        write!(f, "{} x{:.1} ({})", action, self.factor, self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct ScalingAnalyzer {
    samples: VecDeque<LoadSample>,
    cpu_threshold: f64,
    memory_threshold: f64,
}

impl ScalingAnalyzer {
    pub fn new(cpu_threshold: f64, memory_threshold: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(SCALING_WINDOW),
            cpu_threshold,
            memory_threshold,
        }
    }

    pub fn record(&mut self, sample: LoadSample) {
        if self.samples.len() == SCALING_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&LoadSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Averages over the window; `None` means leave capacity alone
    pub fn recommend(&self) -> Option<ScalingRecommendation> {
        if self.samples.len() < MIN_SCALING_SAMPLES {
            return None;
        }

        let count = self.samples.len() as f64;
        let avg_cpu = self.samples.iter().map(|s| s.cpu).sum::<f64>() / count;
        let avg_memory = self.samples.iter().map(|s| s.memory).sum::<f64>() / count;

        if avg_cpu > self.cpu_threshold || avg_memory > self.memory_threshold {
            Some(ScalingRecommendation {
                action: ScalingAction::ScaleUp,
                reason: "High resource usage detected".to_string(),
                factor: scale_up_factor(avg_cpu, avg_memory),
            })
        } else if avg_cpu < SCALE_DOWN_CPU && avg_memory < SCALE_DOWN_MEMORY {
            Some(ScalingRecommendation {
                action: ScalingAction::ScaleDown,
                reason: "Low resource usage detected".to_string(),
                factor: SCALE_DOWN_FACTOR,
            })
        } else {
            None
        }
    }
}

fn scale_up_factor(cpu: f64, memory: f64) -> f64 {
    let peak = cpu.max(memory);
    if peak > 0.9 {
        2.0
    } else if peak > 0.8 {
        1.5
    } else {
        1.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer_with(samples: &[(f64, f64)]) -> ScalingAnalyzer {
        let mut analyzer = ScalingAnalyzer::new(0.7, 0.8);
        for &(cpu, memory) in samples {
            analyzer.record(LoadSample::new(cpu, memory, 0.0));
        }
        analyzer
    }

    #[test]
    fn test_needs_five_samples() {
        assert!(analyzer_with(&[(0.95, 0.95); 4]).recommend().is_none());
    }

    #[test]
    fn test_scale_up_factors() {
        let cases = [((0.95, 0.2), 2.0), ((0.85, 0.2), 1.5), ((0.75, 0.2), 1.2), ((0.2, 0.85), 1.5)];
        for ((cpu, memory), factor) in cases {
            let recommendation = analyzer_with(&[(cpu, memory); 5]).recommend().unwrap();
            assert_eq!(recommendation.action, ScalingAction::ScaleUp);
            assert_eq!(recommendation.factor, factor);
        }
    }

    #[test]
    fn test_scale_down_when_idle() {
        let recommendation = analyzer_with(&[(0.1, 0.2); 6]).recommend().unwrap();
        assert_eq!(recommendation.action, ScalingAction::ScaleDown);
        assert_eq!(recommendation.factor, 0.8);
    }

    #[test]
    fn test_moderate_load_no_change() {
        assert!(analyzer_with(&[(0.5, 0.5); 10]).recommend().is_none());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut analyzer = analyzer_with(&[(0.95, 0.95); SCALING_WINDOW]);
        for _ in 0..SCALING_WINDOW {
            analyzer.record(LoadSample::new(0.1, 0.1, 0.0));
        }
        assert_eq!(analyzer.len(), SCALING_WINDOW);
        assert_eq!(analyzer.recommend().unwrap().action, ScalingAction::ScaleDown);
    }

    #[test]
    fn test_available_capacity_uses_busiest() {
        let sample = LoadSample::new(0.3, 0.85, 0.5);
        assert!((sample.available_capacity() - 0.15).abs() < 1e-9);
    }
}
