//! DAG vertices and the callbacks attached to them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::Dag;
use crate::core::Operation;

/// Shapes the data sent along one edge. `None` forwards nothing.
pub type ForwarderFn = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Combines several named inputs into one. `None` is normalized to empty.
pub type AggregatorFn =
    Arc<dyn Fn(&BTreeMap<String, Vec<u8>>) -> anyhow::Result<Option<Vec<u8>>> + Send + Sync>;

/// Selects the branch keys of a condition node. `None` breaks the contract.
pub type ConditionFn = Arc<dyn Fn(&[u8]) -> Option<Vec<String>> + Send + Sync>;

/// Splits the input of a foreach node into named branch inputs.
pub type ForeachFn = Arc<dyn Fn(&[u8]) -> Option<BTreeMap<String, Vec<u8>>> + Send + Sync>;

/// Returns the identity forwarder attached to new edges.
#[must_use]
pub fn identity_forwarder() -> ForwarderFn {
    Arc::new(|data: &[u8]| Some(data.to_vec()))
}

/// What a node executes. A node is exactly one of these.
#[derive(Clone)]
pub enum NodeKind {
    /// An ordered list of operations.
    Operations(Vec<Operation>),
    /// A nested DAG run in place of the node.
    SubDag(Box<Dag>),
    /// A condition choosing among named DAGs.
    Condition {
        /// The branch selector.
        condition: ConditionFn,
        /// One DAG per branch key.
        dags: BTreeMap<String, Dag>,
    },
    /// A foreach running one DAG per produced key.
    Foreach {
        /// The input splitter.
        foreach: ForeachFn,
        /// The DAG shared by every branch.
        dag: Box<Dag>,
    },
}

impl NodeKind {
    /// Short name used in errors and exports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Operations(_) => "operation",
            Self::SubDag(_) => "sub-dag",
            Self::Condition { .. } => "condition",
            Self::Foreach { .. } => "foreach",
        }
    }

    /// Returns true for condition and foreach nodes.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Condition { .. } | Self::Foreach { .. })
    }

    /// Returns true for an operation node without operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Operations(ops) if ops.is_empty())
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operations(ops) => f.debug_tuple("Operations").field(ops).finish(),
            Self::SubDag(dag) => f.debug_tuple("SubDag").field(dag).finish(),
            Self::Condition { dags, .. } => f
                .debug_struct("Condition")
                .field("branches", &dags.keys().collect::<Vec<_>>())
                .finish(),
            Self::Foreach { dag, .. } => f.debug_struct("Foreach").field("dag", dag).finish(),
        }
    }
}

/// An outgoing edge.
#[derive(Clone)]
pub(crate) struct Edge {
    pub(crate) to: usize,
    pub(crate) forwarder: Option<ForwarderFn>,
}

/// A DAG vertex.
#[derive(Clone)]
pub struct Node {
    pub(crate) id: String,
    pub(crate) index: usize,
    pub(crate) kind: NodeKind,
    pub(crate) children: Vec<Edge>,
    pub(crate) parents: Vec<usize>,
    pub(crate) aggregator: Option<AggregatorFn>,
    pub(crate) sub_aggregator: Option<AggregatorFn>,
    pub(crate) branch_forwarder: Option<ForwarderFn>,
}

impl Node {
    pub(crate) fn new(id: String, index: usize, kind: NodeKind) -> Self {
        let branch_forwarder = kind.is_dynamic().then(identity_forwarder);
        Self {
            id,
            index,
            kind,
            children: Vec::new(),
            parents: Vec::new(),
            aggregator: None,
            sub_aggregator: None,
            branch_forwarder,
        }
    }

    /// Returns the node id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the creation index within the owning DAG.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the node kind.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns the operations of an operation node.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        match &self.kind {
            NodeKind::Operations(ops) => ops,
            _ => &[],
        }
    }

    /// Number of incoming edges.
    #[must_use]
    pub fn indegree(&self) -> usize {
        self.parents.len()
    }

    /// Number of outgoing edges.
    #[must_use]
    pub fn outdegree(&self) -> usize {
        self.children.len()
    }

    /// Returns the fan-in aggregator.
    #[must_use]
    pub fn aggregator(&self) -> Option<&AggregatorFn> {
        self.aggregator.as_ref()
    }

    /// Returns the branch aggregator of a dynamic node.
    #[must_use]
    pub fn sub_aggregator(&self) -> Option<&AggregatorFn> {
        self.sub_aggregator.as_ref()
    }

    /// Returns the forwarder shaping each branch's input.
    #[must_use]
    pub fn branch_forwarder(&self) -> Option<&ForwarderFn> {
        self.branch_forwarder.as_ref()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("children", &self.children.iter().map(|e| e.to).collect::<Vec<_>>())
            .field("parents", &self.parents)
            .field("aggregator", &self.aggregator.is_some())
            .field("sub_aggregator", &self.sub_aggregator.is_some())
            .finish()
    }
}

/// Options for a new edge.
#[derive(Clone)]
pub struct EdgeOptions {
    pub(crate) forwarder: Option<ForwarderFn>,
}

impl Default for EdgeOptions {
    fn default() -> Self {
        Self {
            forwarder: Some(identity_forwarder()),
        }
    }
}

impl EdgeOptions {
    /// An edge that only orders execution and carries no data.
    #[must_use]
    pub fn execution_only() -> Self {
        Self { forwarder: None }
    }

    /// An edge whose data is shaped by `forwarder`.
    #[must_use]
    pub fn forward_with<F>(forwarder: F) -> Self
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            forwarder: Some(Arc::new(forwarder)),
        }
    }
}

impl fmt::Debug for EdgeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeOptions")
            .field("forwarder", &self.forwarder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_forwarder() {
        let forward = identity_forwarder();
        assert_eq!(forward(b"abc"), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_dynamic_nodes_forward_branch_input_by_default() {
        let foreach: ForeachFn = Arc::new(|_| Some(BTreeMap::new()));
        let node = Node::new(
            "f".to_string(),
            0,
            NodeKind::Foreach {
                foreach,
                dag: Box::new(Dag::new()),
            },
        );
        assert!(node.branch_forwarder().is_some());
        assert!(node.kind().is_dynamic());
        assert!(node.sub_aggregator().is_none());

        let plain = Node::new("p".to_string(), 1, NodeKind::Operations(Vec::new()));
        assert!(plain.branch_forwarder().is_none());
        assert!(plain.kind().is_empty());
    }

    #[test]
    fn test_edge_options() {
        assert!(EdgeOptions::default().forwarder.is_some());
        assert!(EdgeOptions::execution_only().forwarder.is_none());

        let opts = EdgeOptions::forward_with(|d| Some(d.repeat(2)));
        let forward = opts.forwarder.unwrap();
        assert_eq!(forward(b"ab"), Some(b"abab".to_vec()));
    }
}
