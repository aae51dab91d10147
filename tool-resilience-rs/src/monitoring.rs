//! Monitoring integration
//!
//! Resilience events (alerts, auto-disables, degraded answers, pressure
//! changes) go out both as `metrics` counters and as structured log lines.
//! A Prometheus exporter can be installed to scrape them.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use tracing::{info, warn};

use crate::types::{ResilienceError, Result};

/// How loudly an event is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventSeverity {
    Info,
    Warning,
}

/// Something noteworthy happened to a protected service
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceEvent {
    pub name: String,
    pub service: Option<String>,
    pub details: Option<String>,
    pub severity: EventSeverity,
}

impl ResilienceEvent {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            service: None,
            details: None,
            severity: EventSeverity::Info,
        }
    }

    pub fn service<S: Into<String>>(mut self, service: S) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn warning(mut self) -> Self {
        self.severity = EventSeverity::Warning;
        self
    }
}

/// Counts the event and logs it
pub fn emit_event(event: ResilienceEvent) {
    let key = format!("resilience.event.{}", event.name);
    let service = event.service.clone().unwrap_or_else(|| "system".to_string());
    counter!(key, 1, "service" => service.clone());

    let details = event.details.as_deref().unwrap_or("");
    match event.severity {
        EventSeverity::Warning => warn!(event = %event.name, service = %service, details = %details, "Resilience event"),
        EventSeverity::Info => info!(event = %event.name, service = %service, details = %details, "Resilience event"),
    }
}

/// Installs the global Prometheus recorder with an HTTP scrape endpoint
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ResilienceError::initialization(format!("prometheus exporter: {}", e)))?;

    info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}
