//! Trajectory of a tool's success rate over its recent history.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::metrics::{ExecutionRecord, RingBuffer};

/// Records kept for trend analysis
pub const TREND_WINDOW: usize = 50;
/// Fewer samples than this yields [`Trend::InsufficientData`]
pub const MIN_TREND_SAMPLES: usize = 5;
/// Success-rate delta between halves that counts as movement
pub const TREND_SENSITIVITY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
    InsufficientData,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Trend::Improving => "IMPROVING",
            Trend::Stable => "STABLE",
            Trend::Degrading => "DEGRADING",
            Trend::InsufficientData => "INSUFFICIENT_DATA",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: Trend,
    pub description: String,
    /// Newer half success rate minus older half success rate
    pub delta: f64,
}

impl TrendAnalysis {
    fn insufficient() -> Self {
        Self {
            direction: Trend::InsufficientData,
            description: "Not enough data for trend analysis".to_string(),
            delta: 0.0,
        }
    }
}

/// Compares the older and newer halves of the last [`TREND_WINDOW`] records
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    history: RingBuffer<ExecutionRecord>,
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TREND_WINDOW)
    }
}

impl TrendAnalyzer {
    pub fn new(window: usize) -> Self {
        Self {
            history: RingBuffer::new(window),
        }
    }

    pub fn record(&mut self, record: ExecutionRecord) {
        self.history.push(record);
    }

    pub fn samples(&self) -> usize {
        self.history.len()
    }

    pub fn analyze(&self) -> TrendAnalysis {
        if self.history.len() < MIN_TREND_SAMPLES {
            return TrendAnalysis::insufficient();
        }

        let (older, newer) = self.history.halves();
        let delta = success_rate(&newer) - success_rate(&older);

        let (direction, description) = if delta > TREND_SENSITIVITY {
            (Trend::Improving, format!("Success rate improving by {:.1}%", delta * 100.0))
        } else if delta < -TREND_SENSITIVITY {
            (Trend::Degrading, format!("Success rate declining by {:.1}%", -delta * 100.0))
        } else {
            (Trend::Stable, "Performance stable".to_string())
        };

        TrendAnalysis {
            direction,
            description,
            delta,
        }
    }
}

fn success_rate(records: &[&ExecutionRecord]) -> f64 {
    if records.is_empty() {
        return 1.0;
    }
    let successes = records.iter().filter(|r| r.success).count();
    successes as f64 / records.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn feed(analyzer: &mut TrendAnalyzer, pattern: &[bool]) {
        for &ok in pattern {
            let record = if ok {
                ExecutionRecord::success(Duration::from_millis(20))
            } else {
                ExecutionRecord::failure("boom")
            };
            analyzer.record(record);
        }
    }

    #[test]
    fn test_insufficient_data() {
        let mut analyzer = TrendAnalyzer::default();
        feed(&mut analyzer, &[true, false, true, true]);
        assert_eq!(analyzer.analyze().direction, Trend::InsufficientData);
    }

    #[test]
    fn test_improving() {
        let mut analyzer = TrendAnalyzer::default();
        feed(&mut analyzer, &[false, false, false, false, true, true, true, true]);
        let analysis = analyzer.analyze();
        assert_eq!(analysis.direction, Trend::Improving);
        assert!((analysis.delta - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_degrading() {
        let mut analyzer = TrendAnalyzer::default();
        feed(&mut analyzer, &[true; 10]);
        feed(&mut analyzer, &[false, true, false, true, false, true, false, true, false, true]);
        let analysis = analyzer.analyze();
        assert_eq!(analysis.direction, Trend::Degrading);
        assert!(analysis.description.contains("declining"));
    }

    #[test]
    fn test_small_movement_is_stable() {
        let mut analyzer = TrendAnalyzer::default();
        // 9/10 then 10/10, delta 0.1 is not strictly greater
        feed(&mut analyzer, &[true, true, true, true, false, true, true, true, true, true]);
        feed(&mut analyzer, &[true; 10]);
        assert_eq!(analyzer.analyze().direction, Trend::Stable);
    }

    #[test]
    fn test_window_evicts_old_failures() {
        let mut analyzer = TrendAnalyzer::new(10);
        feed(&mut analyzer, &[false; 10]);
        feed(&mut analyzer, &[true; 10]);
        assert_eq!(analyzer.samples(), 10);
        assert_eq!(analyzer.analyze().direction, Trend::Stable);
    }
}
