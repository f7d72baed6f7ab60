//! Assertions for hop outcomes and emitted events.

use crate::events::CollectingEventSink;
use crate::executor::ExecutionOutcome;

/// Asserts that a hop completed the request with `expected` as output.
pub fn assert_completed(outcome: &ExecutionOutcome, expected: &[u8]) {
    match outcome {
        ExecutionOutcome::Completed(data) => assert_eq!(
            data.as_slice(),
            expected,
            "Expected output {:?}, got {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(data)
        ),
        other => panic!("Expected a completed request, got {other:?}"),
    }
}

/// Asserts that a hop forwarded exactly `count` continuations.
pub fn assert_forwarded(outcome: &ExecutionOutcome, count: usize) {
    assert_eq!(
        outcome,
        &ExecutionOutcome::Forwarded(count),
        "Expected {count} forwarded continuations, got {outcome:?}"
    );
}

/// Asserts that events of the given types were emitted in this relative
/// order. Other events may appear in between.
pub fn assert_event_order(sink: &CollectingEventSink, expected: &[&str]) {
    let emitted: Vec<String> = sink.events().into_iter().map(|e| e.event_type).collect();
    let mut remaining = expected.iter().peekable();
    for event_type in &emitted {
        if remaining.peek().is_some_and(|next| **next == event_type.as_str()) {
            remaining.next();
        }
    }
    let missing: Vec<_> = remaining.collect();
    assert!(
        missing.is_empty(),
        "Events {missing:?} missing or out of order in {emitted:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSink, FlowEvent};

    #[test]
    fn test_assert_completed() {
        assert_completed(&ExecutionOutcome::Completed(b"ok".to_vec()), b"ok");
    }

    #[test]
    #[should_panic(expected = "Expected a completed request")]
    fn test_assert_completed_rejects_waiting() {
        assert_completed(&ExecutionOutcome::Waiting, b"ok");
    }

    #[test]
    fn test_assert_event_order_allows_gaps() {
        let sink = CollectingEventSink::new();
        for t in ["pipeline.started", "node.started", "node.completed", "pipeline.completed"] {
            sink.emit(&FlowEvent::new(t, "f", "r"));
        }
        assert_event_order(&sink, &["pipeline.started", "pipeline.completed"]);
    }

    #[test]
    #[should_panic(expected = "missing or out of order")]
    fn test_assert_event_order_detects_reordering() {
        let sink = CollectingEventSink::new();
        sink.emit(&FlowEvent::new("b", "f", "r"));
        sink.emit(&FlowEvent::new("a", "f", "r"));
        assert_event_order(&sink, &["a", "b"]);
    }
}
