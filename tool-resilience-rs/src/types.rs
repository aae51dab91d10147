//! # Error Types
//!
//! Error taxonomy for the resilience layer. Every variant that concerns a
//! dependency carries the service identity so callers can branch on the
//! failure without string matching.

use std::time::Duration;

use thiserror::Error;

/// A type alias for Result with the error type defaulting to [`ResilienceError`]
pub type Result<T, E = ResilienceError> = std::result::Result<T, E>;

/// Errors surfaced by the resilience layer
#[derive(Error, Debug)]
pub enum ResilienceError {
    /// The call was rejected without being attempted
    #[error("Circuit breaker open for service {service}: {reason}")]
    BreakerOpen { service: String, reason: String },

    /// The wrapped call kept failing after all retries
    #[error("Operation failed for service {service} after {attempts} attempt(s): {source}")]
    OperationFailed {
        service: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// No pooled connection became available in time
    #[error("Connection pool exhausted for service {service} (waited {waited:?})")]
    PoolExhausted { service: String, waited: Duration },

    /// Even the reduced allocation does not fit the remaining capacity
    #[error("Insufficient capacity for query {query_id}: requested {memory_mb}MB / {connections} connection(s)")]
    InsufficientCapacity {
        query_id: String,
        memory_mb: u64,
        connections: u32,
    },

    /// A service identity with no configured pool was referenced
    #[error("Unknown dependency: {0}")]
    UnknownDependency(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    /// Logging or metrics backends failed to start
    #[error("Initialization error: {0}")]
    Initialization(String),
}

impl ResilienceError {
    /// Create a breaker-open error
    pub fn breaker_open(service: impl Into<String>, reason: impl Into<String>) -> Self {
        ResilienceError::BreakerOpen {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create an operation-failed error
    pub fn operation_failed(service: impl Into<String>, attempts: u32, source: anyhow::Error) -> Self {
        ResilienceError::OperationFailed {
            service: service.into(),
            attempts,
            source,
        }
    }

    /// Create a pool-exhausted error
    pub fn pool_exhausted(service: impl Into<String>, waited: Duration) -> Self {
        ResilienceError::PoolExhausted {
            service: service.into(),
            waited,
        }
    }

    /// Create an unknown-dependency error
    pub fn unknown_dependency(service: impl Into<String>) -> Self {
        ResilienceError::UnknownDependency(service.into())
    }

    /// Create an initialization error
    pub fn initialization(message: impl Into<String>) -> Self {
        ResilienceError::Initialization(message.into())
    }

    /// The service identity this error refers to, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            ResilienceError::BreakerOpen { service, .. }
            | ResilienceError::OperationFailed { service, .. }
            | ResilienceError::PoolExhausted { service, .. } => Some(service),
            ResilienceError::UnknownDependency(service) => Some(service),
            _ => None,
        }
    }

    /// Whether the call was never attempted
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, ResilienceError::BreakerOpen { .. })
    }

    /// Whether the wrapped operation itself failed
    pub fn is_operation_failure(&self) -> bool {
        matches!(self, ResilienceError::OperationFailed { .. })
    }

    /// Whether a fallback may be substituted for this error
    pub fn is_fallback_eligible(&self) -> bool {
        self.is_breaker_open() || self.is_operation_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_is_exposed() {
        let err = ResilienceError::breaker_open("tariff_lookup", "forced");
        assert_eq!(err.service(), Some("tariff_lookup"));
        assert!(err.is_breaker_open());
        assert!(err.is_fallback_eligible());

        let err = ResilienceError::pool_exhausted("database", Duration::from_secs(10));
        assert_eq!(err.service(), Some("database"));
        assert!(!err.is_fallback_eligible());
    }

    #[test]
    fn test_operation_failure_keeps_cause() {
        let err = ResilienceError::operation_failed("llm_api", 4, anyhow::anyhow!("connection reset"));
        let text = err.to_string();
        assert!(text.contains("llm_api"));
        assert!(text.contains("4 attempt"));
        assert!(text.contains("connection reset"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
