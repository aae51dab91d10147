//! # Structured Logging
//!
//! Subscriber setup plus the per-request correlation span that the
//! degradation orchestrator opens around every assistant request.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use uuid::Uuid;

use crate::types::{ResilienceError, Result};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification
    pub service_name: String,
    /// Whether to also write daily rolling log files
    pub file_output: bool,
    pub log_dir: Option<String>,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "tool-resilience".to_string(),
            file_output: false,
            log_dir: None,
            json_format: true,
        }
    }
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start from defaults and selectively override from the provided config.
        let mut base = LoggingConfig::default();

        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(service_name) = cfg.get::<String>("logging.service_name") {
            base.service_name = service_name;
        }
        if let Ok(file_output) = cfg.get::<bool>("logging.file_output") {
            base.file_output = file_output;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }

        Ok(base)
    }
}

/// Whether [`init_logging`] has already installed a subscriber
pub fn logging_initialized() -> bool {
    LOGGING_INITIALIZED.load(Ordering::SeqCst)
}

/// Installs the global subscriber; later calls are no-ops
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // File output is optional, so it is boxed as an `Option` layer
    let file_layer = match (config.file_output, config.log_dir.as_deref()) {
        (true, Some(log_dir)) => {
            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (writer, guard) = NonBlocking::new(appender);
            // The guard flushes on drop; logging lives as long as the process
            Box::leak(Box::new(guard));
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        _ => None,
    };

    let registry = Registry::default().with(filter).with(file_layer);

    let installed = if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .with_span_list(true);
        tracing::subscriber::set_global_default(registry.with(json_layer))
    } else {
        let text_layer = fmt::layer().with_target(true).with_thread_names(true);
        tracing::subscriber::set_global_default(registry.with(text_layer))
    };

    installed.map_err(|e| ResilienceError::initialization(format!("Failed to set global subscriber: {}", e)))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

/// Fresh id tying together every log line of one request
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span carrying the correlation id; instrument request futures with it
pub fn request_span(correlation_id: &str, tool: &str) -> Span {
    tracing::info_span!("assistant_request", correlation_id = %correlation_id, tool = %tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_from_config() {
        let cfg = config::Config::builder()
            .set_override("logging.level", "debug")
            .unwrap()
            .set_override("logging.json_format", false)
            .unwrap()
            .build()
            .unwrap();

        let logging: LoggingConfig = cfg.try_into().unwrap();
        assert_eq!(logging.level, "debug");
        assert!(!logging.json_format);
        assert_eq!(logging.service_name, "tool-resilience");
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            json_format: false,
            ..LoggingConfig::default()
        };
        // another test may have installed a subscriber first
        let first = init_logging(Some(config.clone()));
        if first.is_ok() {
            assert!(logging_initialized());
            assert!(init_logging(Some(config)).is_ok());
        }
    }
}
