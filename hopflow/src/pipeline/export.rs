//! Graphviz and JSON descriptions of a DAG.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

use super::{Dag, Node, NodeKind};

/// A serializable view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Node id.
    pub id: String,
    /// Creation index.
    pub index: usize,
    /// Node kind name.
    pub kind: String,
    /// Operation descriptions, for operation nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<String>,
    /// True if the node has a fan-in aggregator.
    pub aggregator: bool,
    /// Nested DAGs keyed by branch (`""` for a plain sub-DAG or foreach).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_dags: BTreeMap<String, DagDescription>,
}

/// A serializable view of one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescription {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// False for execution-only edges.
    pub forwards_data: bool,
}

/// A serializable view of a DAG, ordered by node index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagDescription {
    /// Nodes in creation order.
    pub nodes: Vec<NodeDescription>,
    /// Edges in source-node order.
    pub edges: Vec<EdgeDescription>,
}

impl Dag {
    /// Returns a serializable description of the DAG.
    #[must_use]
    pub fn describe(&self) -> DagDescription {
        let mut description = DagDescription::default();
        for node in self.nodes() {
            description.nodes.push(describe_node(node));
            for (child, forwarder) in self.children(node) {
                description.edges.push(EdgeDescription {
                    from: node.id().to_string(),
                    to: child.id().to_string(),
                    forwards_data: forwarder.is_some(),
                });
            }
        }
        description
    }

    /// Renders the DAG in Graphviz dot syntax.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph {\n    compound=true;\n");
        write_level(&mut out, self, "", 1);
        out.push_str("}\n");
        out
    }
}

fn describe_node(node: &Node) -> NodeDescription {
    let sub_dags = match node.kind() {
        NodeKind::Operations(_) => BTreeMap::new(),
        NodeKind::SubDag(dag) | NodeKind::Foreach { dag, .. } => {
            BTreeMap::from([(String::new(), dag.describe())])
        }
        NodeKind::Condition { dags, .. } => dags
            .iter()
            .map(|(branch, dag)| (branch.clone(), dag.describe()))
            .collect(),
    };
    NodeDescription {
        id: node.id().to_string(),
        index: node.index(),
        kind: node.kind().name().to_string(),
        operations: node.operations().iter().map(|op| op.description()).collect(),
        aggregator: node.aggregator().is_some(),
        sub_dags,
    }
}

fn write_level(out: &mut String, dag: &Dag, prefix: &str, indent: usize) {
    let pad = "    ".repeat(indent);
    for node in dag.nodes() {
        let id = format!("{prefix}{}", node.id());
        let shape = match node.kind() {
            NodeKind::Operations(_) => "box",
            NodeKind::SubDag(_) => "box3d",
            NodeKind::Condition { .. } => "diamond",
            NodeKind::Foreach { .. } => "hexagon",
        };
        let _ = writeln!(out, "{pad}\"{id}\" [label=\"{}\" shape={shape}];", node.id());

        let nested: Vec<(String, &Dag)> = match node.kind() {
            NodeKind::Operations(_) => Vec::new(),
            NodeKind::SubDag(sub) => vec![(format!("{id}."), sub.as_ref())],
            NodeKind::Foreach { dag: sub, .. } => vec![(format!("{id}.*."), sub.as_ref())],
            NodeKind::Condition { dags, .. } => dags
                .iter()
                .map(|(branch, sub)| (format!("{id}.{branch}."), sub))
                .collect(),
        };
        for (sub_prefix, sub) in nested {
            let cluster = sub_prefix.trim_end_matches('.').replace(['.', '*', '-'], "_");
            let _ = writeln!(out, "{pad}subgraph \"cluster_{cluster}\" {{");
            let _ = writeln!(out, "{pad}    label=\"{}\";", sub_prefix.trim_end_matches('.'));
            write_level(out, sub, &sub_prefix, indent + 1);
            let _ = writeln!(out, "{pad}}}");
        }
    }
    for node in dag.nodes() {
        for (child, forwarder) in dag.children(node) {
            let style = if forwarder.is_some() { "" } else { " [style=dashed]" };
            let _ = writeln!(
                out,
                "{pad}\"{prefix}{}\" -> \"{prefix}{}\"{style};",
                node.id(),
                child.id()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Operation;
    use crate::pipeline::EdgeOptions;
    use pretty_assertions::assert_eq;

    fn diamond() -> Dag {
        let mut dag = Dag::new();
        dag.add_vertex("A", vec![Operation::function("parse")]).unwrap();
        dag.add_edge("A", "B").unwrap();
        dag.add_edge("A", "C").unwrap();
        dag.add_edge("B", "D").unwrap();
        dag.add_edge_with("C", "D", EdgeOptions::execution_only()).unwrap();
        dag
    }

    #[test]
    fn test_describe_orders_by_index() {
        let description = diamond().describe();
        let ids: Vec<&str> = description.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        assert_eq!(description.nodes[0].operations, vec!["function:parse".to_string()]);
        assert_eq!(description.edges.len(), 4);
        assert!(!description.edges[3].forwards_data);
    }

    #[test]
    fn test_describe_nests_branches() {
        let mut inner = Dag::new();
        inner.add_vertex("x", Vec::new()).unwrap();
        let mut dag = Dag::new();
        dag.add_condition(
            "D",
            |_| None,
            BTreeMap::from([("even".to_string(), inner.clone()), ("odd".to_string(), inner)]),
        )
        .unwrap();

        let description = dag.describe();
        let node = &description.nodes[0];
        assert_eq!(node.kind, "condition");
        assert_eq!(node.sub_dags.keys().collect::<Vec<_>>(), vec!["even", "odd"]);
        let json = serde_json::to_value(&description).unwrap();
        assert_eq!(json["nodes"][0]["sub_dags"]["even"]["nodes"][0]["id"], "x");
    }

    #[test]
    fn test_to_dot() {
        let dot = diamond().to_dot();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("\"A\" [label=\"A\" shape=box];"));
        assert!(dot.contains("\"A\" -> \"B\";"));
        assert!(dot.contains("\"C\" -> \"D\" [style=dashed];"));
        assert!(dot.find("\"A\" [").unwrap() < dot.find("\"D\" [").unwrap());
    }

    #[test]
    fn test_to_dot_clusters_sub_dags() {
        let mut inner = Dag::new();
        inner.add_edge("x", "y").unwrap();
        let mut dag = Dag::new();
        dag.add_foreach("F", |_| None, inner).unwrap();

        let dot = dag.to_dot();
        assert!(dot.contains("subgraph \"cluster_F__\" {"));
        assert!(dot.contains("\"F.*.x\" -> \"F.*.y\";"));
    }
}
