//! Error types for the hopflow engine.
//!
//! Errors fall into a small taxonomy that decides how a hop reacts:
//! definition errors abort before any node runs, operation errors may be
//! recovered by a per-operation handler, coordination and transport errors
//! are fatal to the current hop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::RequestState;

/// The main error type for hopflow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The DAG definition is invalid.
    #[error("{0}")]
    Dag(#[from] DagError),

    /// A dynamic construct broke its contract at runtime.
    #[error("{0}")]
    Dynamic(#[from] DynamicNodeError),

    /// An operation failed and was not recovered.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Fan-in or branch coordination failed.
    #[error("{0}")]
    Coordination(#[from] CoordinationError),

    /// Forwarding a continuation failed.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// A request or continuation signature was missing or wrong.
    #[error("{0}")]
    Signature(#[from] SignatureError),

    /// A state or data store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The user's definition code failed.
    #[error("Definition error: {0}")]
    Definition(String),

    /// The request is not in a state that allows the call.
    #[error("Request '{request_id}' is {state}")]
    InvalidState {
        /// The request ID.
        request_id: String,
        /// The state the request is in.
        state: RequestState,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`FlowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid topology, node kind conflict or broken dynamic construct.
    Definition,
    /// Function, callback or modifier failure.
    Operation,
    /// Counter exhaustion or missing intermediate data.
    Coordination,
    /// Continuation forwarding failure.
    Transport,
    /// Signature verification failure.
    Signature,
    /// Store backend failure.
    Store,
    /// Anything else.
    Internal,
}

impl FlowError {
    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Dag(_) | Self::Dynamic(_) | Self::Definition(_) => ErrorKind::Definition,
            Self::Operation(_) => ErrorKind::Operation,
            Self::Coordination(_) => ErrorKind::Coordination,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Signature(_) => ErrorKind::Signature,
            Self::Store(_) => ErrorKind::Store,
            Self::InvalidState { .. }
            | Self::Serialization(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Self::Operation(err) = self {
            map.insert("node".to_string(), serde_json::json!(err.node));
            map.insert("operation".to_string(), serde_json::json!(err.operation));
        }
        map
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised while building or validating a DAG.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DagError {
    /// Adding the edge would create a cycle.
    #[error("Edge {from} -> {to} would create a cycle")]
    Cyclic {
        /// Source node.
        from: String,
        /// Target node.
        to: String,
    },

    /// The edge already exists.
    #[error("Edge {from} -> {to} already exists")]
    DuplicateEdge {
        /// Source node.
        from: String,
        /// Target node.
        to: String,
    },

    /// A vertex with this id already exists.
    #[error("Node '{0}' already exists")]
    DuplicateVertex(String),

    /// More than one node has no parents.
    #[error("DAG has multiple start nodes: {}", .0.join(", "))]
    MultipleStart(Vec<String>),

    /// More than one node has no children.
    #[error("DAG has multiple end nodes: {}", .0.join(", "))]
    MultipleEnd(Vec<String>),

    /// The DAG has no nodes.
    #[error("DAG has no nodes")]
    Empty,

    /// The node does not exist.
    #[error("Node '{0}' not found")]
    UnknownNode(String),

    /// The id cannot be used as a node or branch id.
    #[error("Invalid id '{0}': ids may only contain letters, digits, '_' and '-'")]
    InvalidId(String),

    /// The node already has a different kind.
    #[error("Node '{node}' is already a {existing} node and cannot become a {requested} node")]
    KindConflict {
        /// The node id.
        node: String,
        /// The node's current kind.
        existing: &'static str,
        /// The kind the caller tried to set.
        requested: &'static str,
    },

    /// A join has several data-forwarding parents but no aggregator.
    #[error("Node '{node}' receives data from {} but has no aggregator", parents.join(", "))]
    MissingAggregator {
        /// The join node.
        node: String,
        /// Parents forwarding data.
        parents: Vec<String>,
    },

    /// A condition node has no conditional DAGs.
    #[error("Condition node '{0}' has no branches")]
    NoBranches(String),

    /// A nested DAG is invalid.
    #[error("Sub-DAG of node '{node}' is invalid: {source}")]
    SubDag {
        /// The node owning the sub-DAG.
        node: String,
        /// The nested error.
        #[source]
        source: Box<DagError>,
    },
}

impl DagError {
    /// Wraps an error raised inside the sub-DAG of `node`.
    #[must_use]
    pub fn in_sub_dag(node: impl Into<String>, source: Self) -> Self {
        Self::SubDag {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Returns a stable error code for diagnostics.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cyclic { .. } => "DAG-CYCLIC",
            Self::DuplicateEdge { .. } => "DAG-DUPLICATE_EDGE",
            Self::DuplicateVertex(_) => "DAG-DUPLICATE_VERTEX",
            Self::MultipleStart(_) => "DAG-MULTIPLE_START",
            Self::MultipleEnd(_) => "DAG-MULTIPLE_END",
            Self::Empty => "DAG-EMPTY",
            Self::UnknownNode(_) => "DAG-UNKNOWN_NODE",
            Self::InvalidId(_) => "DAG-INVALID_ID",
            Self::KindConflict { .. } => "DAG-KIND_CONFLICT",
            Self::MissingAggregator { .. } => "DAG-MISSING_AGGREGATOR",
            Self::NoBranches(_) => "DAG-NO_BRANCHES",
            Self::SubDag { source, .. } => source.code(),
        }
    }
}

/// Errors raised when a condition or foreach function breaks its contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DynamicNodeError {
    /// The function returned no result at all.
    #[error("{construct} function of node '{node}' returned nil")]
    NilResult {
        /// The dynamic node id.
        node: String,
        /// `condition` or `foreach`.
        construct: &'static str,
    },

    /// The function returned an empty branch set.
    #[error("{construct} function of node '{node}' produced no branches")]
    NoBranches {
        /// The dynamic node id.
        node: String,
        /// `condition` or `foreach`.
        construct: &'static str,
    },

    /// A condition selected a branch that has no DAG.
    #[error("Condition of node '{node}' selected unknown branch '{branch}'")]
    UnknownBranch {
        /// The dynamic node id.
        node: String,
        /// The unknown branch key.
        branch: String,
    },

    /// A branch key cannot be used in store keys.
    #[error("Node '{node}' produced invalid branch key '{branch}'")]
    InvalidBranchKey {
        /// The dynamic node id.
        node: String,
        /// The offending key.
        branch: String,
    },
}

/// An operation failure, wrapped with node and operation identity.
#[derive(Debug, Error)]
#[error("Node '{node}' operation {index} ({operation}) failed: {source}")]
pub struct OperationError {
    /// The node execution id.
    pub node: String,
    /// Position of the operation in the node's list.
    pub index: usize,
    /// Short description of the operation.
    pub operation: String,
    /// The underlying error.
    #[source]
    pub source: anyhow::Error,
}

impl OperationError {
    /// Creates a new operation error.
    #[must_use]
    pub fn new(
        node: impl Into<String>,
        index: usize,
        operation: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self {
            node: node.into(),
            index,
            operation: operation.into(),
            source,
        }
    }
}

/// Errors raised by an HTTP invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvocationError {
    /// The endpoint answered with a non-2xx status.
    #[error("{url} returned status {status}: {body}")]
    Status {
        /// The invoked URL.
        url: String,
        /// The HTTP status.
        status: u16,
        /// The response body, lossily decoded.
        body: String,
    },

    /// The request could not be sent.
    #[error("Request to {url} failed: {message}")]
    Request {
        /// The invoked URL.
        url: String,
        /// Transport error message.
        message: String,
    },
}

/// Errors raised while coordinating branches and joins.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    /// The CAS retry bound was exhausted.
    #[error("Failed to update counter '{key}' after {attempts} attempts")]
    CounterExhausted {
        /// The counter key.
        key: String,
        /// Attempts made.
        attempts: usize,
    },

    /// A counter held a non-numeric value.
    #[error("Counter '{key}' holds invalid value '{value}'")]
    InvalidCounter {
        /// The counter key.
        key: String,
        /// The stored value.
        value: String,
    },

    /// Intermediate data expected in the data store was missing.
    #[error("Intermediate data '{key}' is missing")]
    MissingData {
        /// The data key.
        key: String,
    },

    /// The branch options of a dynamic node were not found.
    #[error("Branch options '{key}' are missing or invalid")]
    MissingBranchOptions {
        /// The options key.
        key: String,
    },

    /// A fan-in needs a store shared between hops.
    #[error("Node '{node}' joins several hops but the state store travels inside the continuation")]
    EmbeddedStateStore {
        /// The join or dynamic node execution id.
        node: String,
    },
}

/// Errors raised while forwarding a continuation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The receiving endpoint answered with a non-2xx status.
    #[error("Forward to {url} returned status {status}: {body}")]
    Status {
        /// The endpoint URL.
        url: String,
        /// The HTTP status.
        status: u16,
        /// The response body.
        body: String,
    },

    /// The request could not be sent.
    #[error("Forward to {url} failed: {message}")]
    Request {
        /// The endpoint URL.
        url: String,
        /// Transport error message.
        message: String,
    },
}

/// Errors raised by signature verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// No signature was supplied.
    #[error("Signature is missing")]
    Missing,

    /// The signature is not in `sha256=<hex>` form.
    #[error("Signature is malformed: {0}")]
    Malformed(String),

    /// The signature does not match the payload.
    #[error("Signature does not match")]
    Mismatch,

    /// The signed state was issued for another request or store snapshot.
    #[error("Signed state does not match the continuation's {0}")]
    Unbound(&'static str),
}

/// Errors raised by state and data stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The key does not exist.
    #[error("Key '{0}' not found")]
    NotFound(String),

    /// A compare-and-swap found a different current value.
    #[error("Compare-and-swap conflict on key '{key}'")]
    Conflict {
        /// The key.
        key: String,
    },

    /// The store was used before `configure`.
    #[error("Store used before configure")]
    NotConfigured,

    /// Backend-specific failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true for a missing key.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dag_error_codes() {
        let err = DagError::Cyclic {
            from: "b".to_string(),
            to: "a".to_string(),
        };
        assert_eq!(err.code(), "DAG-CYCLIC");
        assert!(err.to_string().contains("b -> a"));

        let nested = DagError::in_sub_dag("outer", DagError::Empty);
        assert_eq!(nested.code(), "DAG-EMPTY");
        assert!(nested.to_string().contains("outer"));
    }

    #[test]
    fn test_multiple_start_message() {
        let err = DagError::MultipleStart(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "DAG has multiple start nodes: a, b");
    }

    #[test]
    fn test_flow_error_kind() {
        let err: FlowError = DagError::Empty.into();
        assert_eq!(err.kind(), ErrorKind::Definition);

        let err: FlowError = DynamicNodeError::NilResult {
            node: "n".to_string(),
            construct: "foreach",
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Definition);

        let err: FlowError = CoordinationError::CounterExhausted {
            key: "k".to_string(),
            attempts: 10,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Coordination);
    }

    #[test]
    fn test_operation_error_to_dict() {
        let err: FlowError =
            OperationError::new("B", 0, "function:double", anyhow::anyhow!("boom")).into();
        let dict = err.to_dict();

        assert_eq!(dict.get("kind").unwrap(), "operation");
        assert_eq!(dict.get("node").unwrap(), "B");
        assert!(dict.get("message").unwrap().as_str().unwrap().contains("boom"));
    }

    #[test]
    fn test_store_error_not_found() {
        assert!(StoreError::NotFound("k".to_string()).is_not_found());
        assert!(!StoreError::NotConfigured.is_not_found());
    }
}
