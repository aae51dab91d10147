//! # Circuit Breaker
//!
//! Per-service circuit breakers with retry and backoff. One
//! [`CircuitBreaker`] owns a registry of independently locked records keyed
//! by service identity, created lazily on first use.
//!
//! State machine:
//! - `CLOSED`: calls pass; consecutive failures reaching the threshold open
//!   the circuit.
//! - `OPEN`: calls are rejected until the open timeout has elapsed since the
//!   last failure, then a single probe moves the circuit to `HALF_OPEN`.
//! - `HALF_OPEN`: the probe's success closes the circuit, its failure
//!   re-opens it.
//!
//! A manual override keeps the circuit open until [`CircuitBreaker::reset`].
//!
//! Admission hands out a [`CallPermit`]. Only the permit that carried the
//! recovery probe settles a `HALF_OPEN` circuit, and dropping it unresolved
//! frees the probe slot for the next caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;
use crate::types::{ResilienceError, Result};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked
    Open,
    /// Testing recovery with a single probe
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration shared by every circuit in a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time after the last failure before a probe is allowed
    pub open_timeout: Duration,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Additional attempts per call
    pub max_retries: u32,
    /// Multiplier applied to the retry delay
    pub backoff_multiplier: f64,
    /// Hard limit for each attempt
    pub call_timeout: Duration,
    /// Random spread applied to retry delays, 0.0 disables jitter
    pub retry_jitter: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
            max_retries: 3,
            backoff_multiplier: 2.0,
            call_timeout: Duration::from_secs(30),
            retry_jitter: 0.0,
        }
    }
}

impl CircuitBreakerConfig {
    /// Retry policy derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.retry_delay,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.retry_jitter,
            attempt_timeout: self.call_timeout,
            ..RetryPolicy::default()
        }
    }

    /// Same configuration with a tighter per-attempt limit
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = self.call_timeout.min(call_timeout);
        self
    }
}

/// Mutable state of a single circuit
#[derive(Debug)]
struct BreakerRecord {
    state: CircuitState,
    consecutive_failures: u32,
    success_count: u64,
    failure_count: u64,
    total_calls: u64,
    rejected_calls: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_state_change: Instant,
    last_state_change_at: DateTime<Utc>,
    last_error: Option<String>,
    forced_open: bool,
    force_reason: Option<String>,
    /// Ticket of the live recovery probe
    probe: Option<u64>,
    probe_seq: u64,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            success_count: 0,
            failure_count: 0,
            total_calls: 0,
            rejected_calls: 0,
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
            last_state_change: Instant::now(),
            last_state_change_at: Utc::now(),
            last_error: None,
            forced_open: false,
            force_reason: None,
            probe: None,
            probe_seq: 0,
        }
    }

    fn start_probe(&mut self) -> u64 {
        self.probe_seq += 1;
        self.probe = Some(self.probe_seq);
        self.probe_seq
    }

    /// Whether `ticket` is the live probe; consumes it if so
    fn take_probe(&mut self, ticket: Option<u64>) -> bool {
        match ticket {
            Some(ticket) if self.probe == Some(ticket) => {
                self.probe = None;
                true
            }
            _ => false,
        }
    }

    fn snapshot(&self, service: &str, config: &CircuitBreakerConfig) -> CircuitBreakerStatus {
        let retry_after = match (self.state, self.last_failure) {
            (CircuitState::Open, Some(at)) if !self.forced_open => {
                Some(config.open_timeout.saturating_sub(at.elapsed()))
            }
            _ => None,
        };

        CircuitBreakerStatus {
            service: service.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            success_count: self.success_count,
            failure_count: self.failure_count,
            total_calls: self.total_calls,
            rejected_calls: self.rejected_calls,
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
            last_state_change_at: self.last_state_change_at,
            last_error: self.last_error.clone(),
            forced_open: self.forced_open,
            force_reason: self.force_reason.clone(),
            retry_after,
            probe_in_flight: self.probe.is_some(),
            healthy: self.state == CircuitState::Closed && !self.forced_open,
            config: config.clone(),
        }
    }
}

/// Point-in-time view of one circuit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub service: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_state_change_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub forced_open: bool,
    pub force_reason: Option<String>,
    /// Remaining time before a probe is allowed
    pub retry_after: Option<Duration>,
    pub probe_in_flight: bool,
    /// Closed and not manually forced open
    pub healthy: bool,
    pub config: CircuitBreakerConfig,
}

/// Result of a call that had a fallback available
#[derive(Debug)]
pub enum CallOutcome<T> {
    /// The protected operation produced the value
    Primary(T),
    /// The fallback produced the value because of `cause`
    Fallback { value: T, cause: ResilienceError },
}

impl<T> CallOutcome<T> {
    /// Returns the value regardless of where it came from
    pub fn into_inner(self) -> T {
        match self {
            CallOutcome::Primary(value) => value,
            CallOutcome::Fallback { value, .. } => value,
        }
    }

    /// Whether the fallback supplied the value
    pub fn is_fallback(&self) -> bool {
        matches!(self, CallOutcome::Fallback { .. })
    }

    /// Why the fallback was used
    pub fn cause(&self) -> Option<&ResilienceError> {
        match self {
            CallOutcome::Primary(_) => None,
            CallOutcome::Fallback { cause, .. } => Some(cause),
        }
    }
}

/// Registry of per-service circuit breakers
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, Arc<Mutex<BreakerRecord>>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates a registry where every circuit uses `config`
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// Configuration applied to every circuit
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn record(&self, service: &str) -> Arc<Mutex<BreakerRecord>> {
        if let Some(existing) = self.circuits.get(service) {
            return existing.value().clone();
        }
        self.circuits
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerRecord::new())))
            .value()
            .clone()
    }

    /// Executes `operation` under the breaker with retries
    pub async fn execute<T, E, F, Fut>(&self, service: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        self.execute_with_policy(service, self.config.retry_policy(), operation)
            .await
    }

    /// Executes `operation` with an explicit retry policy
    pub async fn execute_with_policy<T, E, F, Fut>(
        &self,
        service: &str,
        policy: RetryPolicy,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let permit = self.try_acquire(service)?;

        match policy.run(service, operation).await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(exhausted) => {
                permit.fail(&exhausted.last_error.to_string());
                Err(ResilienceError::operation_failed(
                    service,
                    exhausted.attempts,
                    exhausted.last_error,
                ))
            }
        }
    }

    /// Executes `operation`, substituting `fallback` when the circuit is
    /// open or the retries are exhausted
    pub async fn execute_with_fallback<T, E, F, Fut, FB>(
        &self,
        service: &str,
        operation: F,
        fallback: FB,
    ) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
        FB: FnOnce() -> T,
    {
        match self.execute(service, operation).await {
            Ok(value) => CallOutcome::Primary(value),
            Err(cause) => {
                info!(circuit = %service, cause = %cause, "Using fallback");
                counter!("resilience.breaker.fallbacks", 1, "service" => service.to_string());
                CallOutcome::Fallback {
                    value: fallback(),
                    cause,
                }
            }
        }
    }

    /// Admission check; moves an expired OPEN circuit to HALF_OPEN and makes
    /// the admitted call its recovery probe
    pub fn try_acquire(&self, service: &str) -> Result<CallPermit<'_>> {
        let record = self.record(service);
        let mut rec = record.lock();

        if rec.forced_open {
            rec.rejected_calls += 1;
            counter!("resilience.breaker.rejected", 1, "service" => service.to_string());
            let reason = rec.force_reason.clone().unwrap_or_default();
            return Err(ResilienceError::breaker_open(
                service,
                format!("manually forced open: {}", reason),
            ));
        }

        let probe = match rec.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let elapsed = rec.last_failure.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed < self.config.open_timeout => {
                        rec.rejected_calls += 1;
                        counter!("resilience.breaker.rejected", 1, "service" => service.to_string());
                        let remaining = self.config.open_timeout - elapsed;
                        debug!(
                            circuit = %service,
                            remaining_ms = remaining.as_millis() as u64,
                            "Circuit open, request rejected"
                        );
                        return Err(ResilienceError::breaker_open(
                            service,
                            format!("circuit open, next probe in {}ms", remaining.as_millis()),
                        ));
                    }
                    _ => {
                        self.transition(service, &mut rec, CircuitState::HalfOpen);
                        Some(rec.start_probe())
                    }
                }
            }
            CircuitState::HalfOpen => {
                if rec.probe.is_some() {
                    rec.rejected_calls += 1;
                    counter!("resilience.breaker.rejected", 1, "service" => service.to_string());
                    return Err(ResilienceError::breaker_open(service, "recovery probe in progress"));
                }
                Some(rec.start_probe())
            }
        };

        rec.total_calls += 1;
        if probe.is_some() {
            debug!(circuit = %service, "Recovery probe admitted");
        }
        drop(rec);

        Ok(CallPermit {
            breaker: self,
            service: service.to_string(),
            record,
            probe,
            resolved: false,
        })
    }

    /// Records a success for a call admitted outside [`try_acquire`](Self::try_acquire).
    /// Such a call is never the recovery probe, so it does not close a
    /// HALF_OPEN circuit.
    pub fn record_success(&self, service: &str) {
        let record = self.record(service);
        let mut rec = record.lock();
        self.settle_success(service, &mut rec, None);
    }

    /// Records a failure for a call admitted outside [`try_acquire`](Self::try_acquire)
    pub fn record_failure(&self, service: &str, error: &str) {
        let record = self.record(service);
        let mut rec = record.lock();
        self.settle_failure(service, &mut rec, None, error);
    }

    fn settle_success(&self, service: &str, rec: &mut BreakerRecord, ticket: Option<u64>) {
        let was_probe = rec.take_probe(ticket);

        rec.success_count += 1;
        rec.consecutive_failures = 0;
        rec.last_success_at = Some(Utc::now());

        if rec.state == CircuitState::HalfOpen && was_probe && !rec.forced_open {
            self.transition(service, rec, CircuitState::Closed);
            info!(circuit = %service, "Circuit CLOSED: Service recovered");
        }
    }

    fn settle_failure(&self, service: &str, rec: &mut BreakerRecord, ticket: Option<u64>, error: &str) {
        let was_probe = rec.take_probe(ticket);

        rec.failure_count += 1;
        rec.consecutive_failures += 1;
        rec.last_failure = Some(Instant::now());
        rec.last_failure_at = Some(Utc::now());
        rec.last_error = Some(error.to_string());

        match rec.state {
            CircuitState::Closed if rec.consecutive_failures >= self.config.failure_threshold => {
                self.transition(service, rec, CircuitState::Open);
                warn!(
                    circuit = %service,
                    failures = rec.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    error = %error,
                    "Circuit OPEN: Failure threshold exceeded"
                );
            }
            CircuitState::HalfOpen if was_probe => {
                self.transition(service, rec, CircuitState::Open);
                warn!(circuit = %service, error = %error, "Circuit OPEN: Recovery probe failed");
            }
            _ => {}
        }
    }

    fn transition(&self, service: &str, rec: &mut BreakerRecord, to: CircuitState) {
        let from = rec.state;
        if from == to {
            return;
        }

        rec.state = to;
        rec.last_state_change = Instant::now();
        rec.last_state_change_at = Utc::now();
        if to == CircuitState::Closed {
            rec.consecutive_failures = 0;
        }

        debug!(circuit = %service, from = %from, to = %to, "Circuit state transition");
        gauge!("resilience.breaker.state", to.gauge_value(), "service" => service.to_string());
        counter!(
            "resilience.breaker.transitions",
            1,
            "service" => service.to_string(),
            "to" => to.to_string()
        );
    }

    /// Current status; an unseen service reports a fresh CLOSED circuit
    pub fn status(&self, service: &str) -> CircuitBreakerStatus {
        match self.circuits.get(service) {
            Some(record) => record.value().lock().snapshot(service, &self.config),
            None => BreakerRecord::new().snapshot(service, &self.config),
        }
    }

    /// Status of every circuit seen so far
    pub fn all_statuses(&self) -> HashMap<String, CircuitBreakerStatus> {
        self.circuits
            .iter()
            .map(|entry| {
                let status = entry.value().lock().snapshot(entry.key(), &self.config);
                (entry.key().clone(), status)
            })
            .collect()
    }

    /// Whether the circuit is closed and not forced open
    pub fn is_healthy(&self, service: &str) -> bool {
        self.status(service).healthy
    }

    /// Current state of a circuit
    pub fn state(&self, service: &str) -> CircuitState {
        self.status(service).state
    }

    /// Closes the circuit and clears any manual override
    pub fn reset(&self, service: &str) {
        let record = self.record(service);
        let mut rec = record.lock();

        rec.forced_open = false;
        rec.force_reason = None;
        rec.probe = None;
        rec.consecutive_failures = 0;
        self.transition(service, &mut rec, CircuitState::Closed);

        info!(circuit = %service, "Circuit manually reset");
    }

    /// Resets every known circuit
    pub fn reset_all(&self) {
        let services: Vec<String> = self.circuits.iter().map(|e| e.key().clone()).collect();
        for service in services {
            self.reset(&service);
        }
    }

    /// Forces the circuit open until [`CircuitBreaker::reset`] is called
    pub fn force_open(&self, service: &str, reason: &str) {
        let record = self.record(service);
        let mut rec = record.lock();

        rec.forced_open = true;
        rec.force_reason = Some(reason.to_string());
        rec.probe = None;
        self.transition(service, &mut rec, CircuitState::Open);

        warn!(circuit = %service, reason = %reason, "Circuit manually forced OPEN");
    }

    /// Services with a circuit record
    pub fn services(&self) -> Vec<String> {
        self.circuits.iter().map(|e| e.key().clone()).collect()
    }
}

/// Admission to one protected call.
///
/// Resolve it with [`CallPermit::succeed`] or [`CallPermit::fail`]. A permit
/// dropped unresolved, for example when the caller's future is cancelled,
/// records nothing and frees the recovery probe slot.
#[derive(Debug)]
#[must_use = "an unresolved permit records no outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    service: String,
    record: Arc<Mutex<BreakerRecord>>,
    probe: Option<u64>,
    resolved: bool,
}

impl CallPermit<'_> {
    /// Whether this call is the circuit's recovery probe
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        let mut rec = self.record.lock();
        self.breaker.settle_success(&self.service, &mut rec, self.probe);
    }

    pub fn fail(mut self, error: &str) {
        self.resolved = true;
        let mut rec = self.record.lock();
        self.breaker.settle_failure(&self.service, &mut rec, self.probe, error);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let mut rec = self.record.lock();
        if rec.take_probe(self.probe) {
            debug!(circuit = %self.service, "Recovery probe abandoned");
        }
    }
}
