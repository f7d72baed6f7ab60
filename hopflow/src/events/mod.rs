//! Lifecycle events emitted by the executor.
//!
//! Every hop reports what it did to an [`EventSink`]. Events are plain
//! records: a dotted type, the flow and request they belong to, the node
//! execution id when one applies, and free-form JSON details.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::{Deserialize, Serialize};

use crate::utils::iso_timestamp;

/// A request started executing its first node.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// A node began running its operations.
pub const NODE_STARTED: &str = "node.started";
/// A node finished its operations.
pub const NODE_COMPLETED: &str = "node.completed";
/// A node failed with an unrecovered error.
pub const NODE_FAILED: &str = "node.failed";
/// A dynamic node forwarded one of its branches.
pub const BRANCH_DISPATCHED: &str = "branch.dispatched";
/// A join counter was incremented but siblings are still outstanding.
pub const JOIN_WAITING: &str = "join.waiting";
/// The last sibling reached a join.
pub const JOIN_COMPLETED: &str = "join.completed";
/// A hop arrived while the request was paused and was parked.
pub const HOP_PARKED: &str = "hop.parked";
/// The end node of the top-level DAG finished.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// The request failed.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// The request was stopped.
pub const PIPELINE_STOPPED: &str = "pipeline.stopped";

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Dotted event type, one of the constants in this module.
    pub event_type: String,
    /// The flow name.
    pub flow: String,
    /// The request id.
    pub request_id: String,
    /// The node execution id, if the event concerns a node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// When the event was created.
    pub timestamp: String,
    /// Event-specific details.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl FlowEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        flow: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            flow: flow.into(),
            request_id: request_id.into(),
            node: None,
            timestamp: iso_timestamp(),
            data: serde_json::Value::Null,
        }
    }

    /// Sets the node execution id.
    #[must_use]
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Sets the event details.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_builder() {
        let event = FlowEvent::new(NODE_COMPLETED, "orders", "req-1")
            .with_node("D.even.x")
            .with_data(serde_json::json!({"bytes": 3}));

        assert_eq!(event.event_type, "node.completed");
        assert_eq!(event.node.as_deref(), Some("D.even.x"));
        assert_eq!(event.data["bytes"], 3);
    }

    #[test]
    fn test_event_serialization_skips_missing_node() {
        let event = FlowEvent::new(PIPELINE_STARTED, "orders", "req-1");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("node").is_none());
        assert_eq!(json["flow"], "orders");
    }
}
