//! Auto-disable and auto-recovery bookkeeping for one tool.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Consecutive failures that trigger auto-disable
pub const AUTO_DISABLE_THRESHOLD: u32 = 5;
/// Minimum spacing between recovery attempts
pub const RECOVERY_INTERVAL: Duration = Duration::from_secs(10 * 60);

const AUTO_DISABLED_SCORE: f64 = 0.1;
const FAILURE_PENALTY: f64 = 0.2;

/// What changed as a result of recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureEffect {
    Counted,
    AutoDisabled,
}

#[derive(Debug, Clone)]
pub struct AvailabilityManager {
    consecutive_failures: u32,
    auto_disabled: bool,
    manually_disabled: bool,
    disable_reason: Option<String>,
    last_recovery_attempt: Option<Instant>,
    threshold: u32,
    recovery_interval: Duration,
}

impl Default for AvailabilityManager {
    fn default() -> Self {
        Self::new(AUTO_DISABLE_THRESHOLD, RECOVERY_INTERVAL)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityState {
    pub consecutive_failures: u32,
    pub auto_disabled: bool,
    pub manually_disabled: bool,
    pub disable_reason: Option<String>,
    pub score: f64,
}

impl AvailabilityManager {
    pub fn new(threshold: u32, recovery_interval: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            auto_disabled: false,
            manually_disabled: false,
            disable_reason: None,
            last_recovery_attempt: None,
            threshold: threshold.max(1),
            recovery_interval,
        }
    }

    /// Returns true when this success lifted an auto-disable
    pub fn record_success(&mut self) -> bool {
        self.consecutive_failures = 0;
        if self.auto_disabled {
            self.auto_disabled = false;
            self.disable_reason = None;
            self.last_recovery_attempt = None;
            return true;
        }
        false
    }

    pub fn record_failure(&mut self, error: &str) -> FailureEffect {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if !self.auto_disabled && self.consecutive_failures >= self.threshold {
            self.auto_disabled = true;
            self.disable_reason = Some(format!("Too many consecutive failures: {}", error));
            // recovery clock starts at the moment of disabling
            self.last_recovery_attempt = Some(Instant::now());
            return FailureEffect::AutoDisabled;
        }
        FailureEffect::Counted
    }

    /// Clears the failure counter of an auto-disabled tool once the recovery
    /// interval has passed, so the next probe gets a fresh start
    pub fn attempt_recovery(&mut self) -> bool {
        if !self.auto_disabled {
            return false;
        }
        let due = self
            .last_recovery_attempt
            .map_or(true, |at| at.elapsed() >= self.recovery_interval);
        if !due {
            return false;
        }
        self.consecutive_failures = 0;
        self.last_recovery_attempt = Some(Instant::now());
        true
    }

    /// Manual switch; enabling also clears any automatic disable
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.manually_disabled = false;
            self.auto_disabled = false;
            self.disable_reason = None;
            self.consecutive_failures = 0;
            self.last_recovery_attempt = None;
        } else {
            self.manually_disabled = true;
            self.disable_reason = Some("Manually disabled".to_string());
        }
    }

    pub fn score(&self) -> f64 {
        if self.manually_disabled {
            0.0
        } else if self.auto_disabled {
            AUTO_DISABLED_SCORE
        } else {
            (1.0 - FAILURE_PENALTY * self.consecutive_failures as f64).max(0.0)
        }
    }

    pub fn should_disable(&self) -> bool {
        self.auto_disabled || self.manually_disabled
    }

    pub fn is_auto_disabled(&self) -> bool {
        self.auto_disabled
    }

    pub fn is_manually_disabled(&self) -> bool {
        self.manually_disabled
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn disable_reason(&self) -> Option<&str> {
        self.disable_reason.as_deref()
    }

    pub fn state(&self) -> AvailabilityState {
        AvailabilityState {
            consecutive_failures: self.consecutive_failures,
            auto_disabled: self.auto_disabled,
            manually_disabled: self.manually_disabled,
            disable_reason: self.disable_reason.clone(),
            score: self.score(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_drops_with_failures() {
        let mut manager = AvailabilityManager::default();
        let mut previous = manager.score();
        assert_eq!(previous, 1.0);

        for _ in 0..4 {
            manager.record_failure("boom");
            let score = manager.score();
            assert!(score <= previous);
            previous = score;
        }
        assert!((manager.score() - 0.2).abs() < 1e-9);

        manager.record_success();
        assert_eq!(manager.score(), 1.0);
    }

    #[test]
    fn test_auto_disable_at_threshold() {
        let mut manager = AvailabilityManager::default();
        for i in 1..AUTO_DISABLE_THRESHOLD {
            assert_eq!(manager.record_failure(&format!("error {}", i)), FailureEffect::Counted);
        }
        assert_eq!(manager.record_failure("error 5"), FailureEffect::AutoDisabled);
        assert!(manager.should_disable());
        assert_eq!(manager.score(), 0.1);
        assert_eq!(manager.disable_reason(), Some("Too many consecutive failures: error 5"));

        // further failures do not re-trigger
        assert_eq!(manager.record_failure("error 6"), FailureEffect::Counted);

        assert!(manager.record_success());
        assert!(!manager.should_disable());
        assert_eq!(manager.disable_reason(), None);
    }

    #[test]
    fn test_manual_disable_wins() {
        let mut manager = AvailabilityManager::default();
        for _ in 0..5 {
            manager.record_failure("x");
        }
        manager.set_enabled(false);
        assert_eq!(manager.score(), 0.0);

        manager.set_enabled(true);
        assert_eq!(manager.score(), 1.0);
        assert!(!manager.is_auto_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_waits_for_interval() {
        let mut manager = AvailabilityManager::default();
        for _ in 0..5 {
            manager.record_failure("down");
        }
        assert!(!manager.attempt_recovery());

        tokio::time::advance(RECOVERY_INTERVAL).await;
        assert!(manager.attempt_recovery());
        assert_eq!(manager.consecutive_failures(), 0);
        assert!(manager.is_auto_disabled());

        // the next attempt needs another full interval
        assert!(!manager.attempt_recovery());
    }
}
