//! Tracing setup and per-hop span attributes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use crate::errors::FlowError;

fn default_filter() -> String {
    "info".to_string()
}

/// Subscriber settings for [`init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Fallback filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl TracingConfig {
    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Switches to JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<(), FlowError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| FlowError::Config(format!("invalid log filter: {e}")))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| FlowError::Config(format!("tracing already initialized: {e}")))
}

/// Attributes describing one hop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HopSpanAttributes {
    /// Flow name.
    pub flow: String,
    /// Request ID.
    pub request_id: String,
    /// Node execution ID.
    pub node: Option<String>,
    /// Nesting depth of the node.
    pub depth: usize,
    /// Node kind.
    pub kind: Option<String>,
}

impl HopSpanAttributes {
    /// Creates attributes for a request.
    #[must_use]
    pub fn new(flow: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    /// Sets the node and its depth.
    #[must_use]
    pub fn with_node(mut self, node: impl Into<String>, depth: usize) -> Self {
        self.node = Some(node.into());
        self.depth = depth;
        self
    }

    /// Sets the node kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Converts to OpenTelemetry-style attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("flow.name".to_string(), self.flow.clone());
        attrs.insert("flow.request_id".to_string(), self.request_id.clone());
        attrs.insert("flow.depth".to_string(), self.depth.to_string());
        if let Some(ref v) = self.node {
            attrs.insert("flow.node".to_string(), v.clone());
        }
        if let Some(ref v) = self.kind {
            attrs.insert("flow.node_kind".to_string(), v.clone());
        }
        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
