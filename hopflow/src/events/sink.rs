//! Event sink trait and implementations.

use parking_lot::RwLock;
use tracing::{debug, info, Level};

use super::FlowEvent;

/// Receives lifecycle events from the executor.
///
/// Emission is synchronous and must not fail; sinks that ship events
/// elsewhere should buffer internally.
pub trait EventSink: Send + Sync {
    /// Records an event.
    fn emit(&self, event: &FlowEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &FlowEvent) {}
}

/// An event sink that logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &FlowEvent) {
        let node = event.node.as_deref().unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.event_type,
                flow = %event.flow,
                request_id = %event.request_id,
                node,
                data = %event.data,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                event_type = %event.event_type,
                flow = %event.flow,
                request_id = %event.request_id,
                node,
                data = %event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

/// A collecting event sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<FlowEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of exactly this type.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<FlowEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Counts events of exactly this type.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &FlowEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NODE_COMPLETED, NODE_STARTED};

    #[test]
    fn test_noop_and_logging_sinks_accept_events() {
        let event = FlowEvent::new(NODE_STARTED, "f", "r");
        NoOpEventSink.emit(&event);
        LoggingEventSink::default().emit(&event);
        LoggingEventSink::debug().emit(&event.clone().with_node("A"));
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&FlowEvent::new(NODE_STARTED, "f", "r").with_node("A"));
        sink.emit(&FlowEvent::new(NODE_COMPLETED, "f", "r").with_node("A"));
        sink.emit(&FlowEvent::new(NODE_STARTED, "f", "r").with_node("B"));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.count(NODE_STARTED), 2);
        assert_eq!(sink.events_of_type(NODE_COMPLETED)[0].node.as_deref(), Some("A"));

        sink.clear();
        assert!(sink.is_empty());
    }
}
