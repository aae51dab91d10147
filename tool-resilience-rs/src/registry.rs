//! Tool registry seam.
//!
//! The resilience layer never talks to tools directly. It asks a
//! [`ToolRegistry`] which tools exist, whether they are available and
//! invokes them through it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request to run one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name, also its service identity
    pub name: String,
    /// Named arguments
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    /// Adds an argument
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Reads a string argument
    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    /// Minimal synthetic call used by health probes
    pub fn health_probe(name: &str) -> Self {
        let call = ToolCall::new(name);
        match name {
            "tariff_lookup" => call
                .with_argument("hsCode", "0101.21")
                .with_argument("originCountry", "US")
                .with_argument("destinationCountry", "CA"),
            "hs_code_finder" => call.with_argument("productDescription", "test"),
            "agreement_tool" => call.with_argument("countryCode", "US"),
            _ => call,
        }
    }
}

/// What a tool returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_name: String,
    pub content: String,
}

impl ToolOutput {
    pub fn new(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            content: content.into(),
        }
    }
}

/// Directory and invoker of the assistant's tools
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Every tool the registry knows about
    fn tool_names(&self) -> Vec<String>;

    /// Whether the tool is registered and enabled
    fn is_available(&self, name: &str) -> bool;

    /// Runs the call; errors are opaque to the resilience layer
    async fn invoke(&self, call: ToolCall) -> anyhow::Result<ToolOutput>;
}
