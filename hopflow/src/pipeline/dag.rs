//! The DAG model: an arena of nodes with cycle-checked edge insertion.
//!
//! Nodes are stored in creation order; a node's `index` is its position in
//! the arena, so the counter is owned by each `Dag` instance. Cycle checks are
//! a reachability query at insertion time.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use super::node::{
    AggregatorFn, ConditionFn, Edge, EdgeOptions, ForeachFn, ForwarderFn, Node, NodeKind,
};
use crate::core::Operation;
use crate::errors::DagError;
use crate::utils::is_valid_id;

/// A directed acyclic graph of nodes.
#[derive(Clone, Default)]
pub struct Dag {
    nodes: Vec<Node>,
    ids: HashMap<String, usize>,
}

impl Dag {
    /// Creates an empty DAG.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the DAG has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if a node with this id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Returns the node with this id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.ids.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns all nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Returns the children of a node with the forwarder of each edge.
    pub fn children<'a>(
        &'a self,
        node: &'a Node,
    ) -> impl Iterator<Item = (&'a Node, Option<&'a ForwarderFn>)> + 'a {
        node.children
            .iter()
            .map(move |edge| (&self.nodes[edge.to], edge.forwarder.as_ref()))
    }

    /// Returns the parents of a node in edge insertion order.
    pub fn parents<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Node> + 'a {
        node.parents.iter().map(move |&i| &self.nodes[i])
    }

    /// Returns the ids of the nodes a node depends on.
    #[must_use]
    pub fn depends_on(&self, id: &str) -> Vec<String> {
        self.node(id)
            .map(|n| self.parents(n).map(|p| p.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the forwarder of the edge `from -> to`, if the edge forwards data.
    #[must_use]
    pub fn edge_forwarder(&self, from: &str, to: &str) -> Option<&ForwarderFn> {
        let from = self.node(from)?;
        let to = *self.ids.get(to)?;
        from.children
            .iter()
            .find(|edge| edge.to == to)
            .and_then(|edge| edge.forwarder.as_ref())
    }

    /// Returns the first node without parents.
    #[must_use]
    pub fn start(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.parents.is_empty())
    }

    /// Returns the first node without children.
    #[must_use]
    pub fn end(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.children.is_empty())
    }

    /// Adds a vertex with its operations.
    ///
    /// A vertex auto-created by [`Dag::add_edge`] receives the operations;
    /// any other existing id is rejected.
    pub fn add_vertex(
        &mut self,
        id: impl Into<String>,
        operations: Vec<Operation>,
    ) -> Result<(), DagError> {
        let id = id.into();
        if let Some(&i) = self.ids.get(&id) {
            if self.nodes[i].kind.is_empty() {
                self.nodes[i].kind = NodeKind::Operations(operations);
                return Ok(());
            }
            return Err(DagError::DuplicateVertex(id));
        }
        self.insert(id, NodeKind::Operations(operations))?;
        Ok(())
    }

    /// Appends an operation to a node, creating the node if needed.
    pub fn add_operation(&mut self, id: &str, operation: Operation) -> Result<(), DagError> {
        let i = self.ensure(id)?;
        match &mut self.nodes[i].kind {
            NodeKind::Operations(ops) => {
                ops.push(operation);
                Ok(())
            }
            other => Err(DagError::KindConflict {
                node: id.to_string(),
                existing: other.name(),
                requested: "operation",
            }),
        }
    }

    /// Adds an edge with the default identity forwarder.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), DagError> {
        self.add_edge_with(from, to, EdgeOptions::default())
    }

    /// Adds an edge, creating missing endpoints as empty nodes.
    ///
    /// Rejects duplicates and any edge that would close a cycle.
    pub fn add_edge_with(
        &mut self,
        from: &str,
        to: &str,
        options: EdgeOptions,
    ) -> Result<(), DagError> {
        for id in [from, to] {
            if !is_valid_id(id) {
                return Err(DagError::InvalidId(id.to_string()));
            }
        }
        if from == to {
            return Err(DagError::Cyclic {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if let (Some(&f), Some(&t)) = (self.ids.get(from), self.ids.get(to)) {
            if self.nodes[f].children.iter().any(|edge| edge.to == t) {
                return Err(DagError::DuplicateEdge {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            if self.has_path(t, f) {
                return Err(DagError::Cyclic {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }

        let f = self.ensure(from)?;
        let t = self.ensure(to)?;
        self.nodes[f].children.push(Edge {
            to: t,
            forwarder: options.forwarder,
        });
        self.nodes[t].parents.push(f);
        Ok(())
    }

    /// Turns a node into one running a nested DAG.
    pub fn add_sub_dag(&mut self, id: &str, dag: Self) -> Result<(), DagError> {
        self.set_kind(id, NodeKind::SubDag(Box::new(dag)))
    }

    /// Turns a node into a condition node.
    ///
    /// `condition` returns the keys of the branches to run; each key must
    /// name one of `dags`.
    pub fn add_condition<F>(
        &mut self,
        id: &str,
        condition: F,
        dags: BTreeMap<String, Self>,
    ) -> Result<(), DagError>
    where
        F: Fn(&[u8]) -> Option<Vec<String>> + Send + Sync + 'static,
    {
        for key in dags.keys() {
            if !is_valid_id(key) {
                return Err(DagError::InvalidId(key.clone()));
            }
        }
        let condition: ConditionFn = Arc::new(condition);
        self.set_kind(id, NodeKind::Condition { condition, dags })
    }

    /// Turns a node into a foreach node running `dag` once per produced key.
    pub fn add_foreach<F>(&mut self, id: &str, foreach: F, dag: Self) -> Result<(), DagError>
    where
        F: Fn(&[u8]) -> Option<BTreeMap<String, Vec<u8>>> + Send + Sync + 'static,
    {
        let foreach: ForeachFn = Arc::new(foreach);
        self.set_kind(
            id,
            NodeKind::Foreach {
                foreach,
                dag: Box::new(dag),
            },
        )
    }

    /// Sets the aggregator combining the outputs of a join node's parents.
    pub fn set_aggregator<F>(&mut self, id: &str, aggregator: F) -> Result<(), DagError>
    where
        F: Fn(&BTreeMap<String, Vec<u8>>) -> anyhow::Result<Option<Vec<u8>>>
            + Send
            + Sync
            + 'static,
    {
        let node = self.node_mut(id)?;
        node.aggregator = Some(Arc::new(aggregator) as AggregatorFn);
        Ok(())
    }

    /// Sets the aggregator merging the branch outputs of a dynamic node.
    pub fn set_sub_aggregator<F>(&mut self, id: &str, aggregator: F) -> Result<(), DagError>
    where
        F: Fn(&BTreeMap<String, Vec<u8>>) -> anyhow::Result<Option<Vec<u8>>>
            + Send
            + Sync
            + 'static,
    {
        let node = self.dynamic_node_mut(id, "sub-aggregator")?;
        node.sub_aggregator = Some(Arc::new(aggregator) as AggregatorFn);
        Ok(())
    }

    /// Replaces the forwarder shaping branch inputs of a dynamic node.
    ///
    /// `None` starts every branch with an empty input.
    pub fn set_branch_forwarder(
        &mut self,
        id: &str,
        forwarder: Option<ForwarderFn>,
    ) -> Result<(), DagError> {
        let node = self.dynamic_node_mut(id, "branch forwarder")?;
        node.branch_forwarder = forwarder;
        Ok(())
    }

    /// Checks the start/end invariants and join aggregators, recursively.
    pub fn validate(&self) -> Result<(), DagError> {
        if self.nodes.is_empty() {
            return Err(DagError::Empty);
        }

        let starts: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.parents.is_empty())
            .map(|n| n.id.clone())
            .collect();
        if starts.len() > 1 {
            return Err(DagError::MultipleStart(starts));
        }

        let ends: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.children.is_empty())
            .map(|n| n.id.clone())
            .collect();
        if ends.len() > 1 {
            return Err(DagError::MultipleEnd(ends));
        }

        for node in &self.nodes {
            if node.indegree() > 1 && node.aggregator.is_none() {
                let forwarding: Vec<String> = self
                    .parents(node)
                    .filter(|p| self.edge_forwarder(&p.id, &node.id).is_some())
                    .map(|p| p.id.clone())
                    .collect();
                if forwarding.len() > 1 {
                    return Err(DagError::MissingAggregator {
                        node: node.id.clone(),
                        parents: forwarding,
                    });
                }
            }

            match &node.kind {
                NodeKind::Operations(_) => {}
                NodeKind::SubDag(dag) | NodeKind::Foreach { dag, .. } => dag
                    .validate()
                    .map_err(|e| DagError::in_sub_dag(&node.id, e))?,
                NodeKind::Condition { dags, .. } => {
                    if dags.is_empty() {
                        return Err(DagError::NoBranches(node.id.clone()));
                    }
                    for dag in dags.values() {
                        dag.validate()
                            .map_err(|e| DagError::in_sub_dag(&node.id, e))?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns true if `to` is reachable from `from`.
    fn has_path(&self, from: usize, to: usize) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(i) = queue.pop_front() {
            if i == to {
                return true;
            }
            if seen.insert(i) {
                queue.extend(self.nodes[i].children.iter().map(|edge| edge.to));
            }
        }
        false
    }

    fn insert(&mut self, id: String, kind: NodeKind) -> Result<usize, DagError> {
        if !is_valid_id(&id) {
            return Err(DagError::InvalidId(id));
        }
        let index = self.nodes.len();
        self.ids.insert(id.clone(), index);
        self.nodes.push(Node::new(id, index, kind));
        Ok(index)
    }

    fn ensure(&mut self, id: &str) -> Result<usize, DagError> {
        match self.ids.get(id) {
            Some(&i) => Ok(i),
            None => self.insert(id.to_string(), NodeKind::Operations(Vec::new())),
        }
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, DagError> {
        match self.ids.get(id) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(DagError::UnknownNode(id.to_string())),
        }
    }

    fn dynamic_node_mut(&mut self, id: &str, what: &'static str) -> Result<&mut Node, DagError> {
        let node = self.node_mut(id)?;
        if !node.kind.is_dynamic() {
            return Err(DagError::KindConflict {
                node: id.to_string(),
                existing: node.kind.name(),
                requested: what,
            });
        }
        Ok(node)
    }

    fn set_kind(&mut self, id: &str, kind: NodeKind) -> Result<(), DagError> {
        let i = self.ensure(id)?;
        let node = &mut self.nodes[i];
        if !node.kind.is_empty() {
            return Err(DagError::KindConflict {
                node: id.to_string(),
                existing: node.kind.name(),
                requested: kind.name(),
            });
        }
        if kind.is_dynamic() && node.branch_forwarder.is_none() {
            node.branch_forwarder = Some(super::node::identity_forwarder());
        }
        node.kind = kind;
        Ok(())
    }
}

impl fmt::Debug for Dag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dag").field("nodes", &self.nodes).finish()
    }
}
