//! Execution positions: where in a nested DAG a hop runs.

use serde::{Deserialize, Serialize};

use crate::errors::DagError;
use crate::pipeline::{Dag, Node, NodeKind};

/// One level of an execution position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Node id within the DAG of this level.
    pub node: String,
    /// Branch key, set when the next level runs inside a dynamic branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Frame {
    fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            branch: None,
        }
    }
}

/// A stack of frames from the top-level DAG down to the current node.
///
/// Frame 0 lives in the top-level DAG; every further frame lives in the
/// sub-DAG of the node named by the frame above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionPosition {
    frames: Vec<Frame>,
}

impl ExecutionPosition {
    /// Creates a position at a top-level node.
    #[must_use]
    pub fn root(node: impl Into<String>) -> Self {
        Self {
            frames: vec![Frame::new(node)],
        }
    }

    /// Returns the frames, outermost first.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Nesting depth; 0 for the top-level DAG.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    /// Returns the id of the current node.
    #[must_use]
    pub fn node(&self) -> &str {
        self.frames.last().map_or("", |f| f.node.as_str())
    }

    /// Returns the branch the current level runs in, if any.
    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        let len = self.frames.len();
        if len < 2 {
            return None;
        }
        self.frames[len - 2].branch.as_deref()
    }

    /// Prefix shared by every node execution id at the current level.
    ///
    /// Empty at the top level, `D.even.` inside branch `even` of `D`,
    /// `S.` inside the plain sub-DAG of `S`.
    #[must_use]
    pub fn level_prefix(&self) -> String {
        let mut prefix = String::new();
        for frame in &self.frames[..self.frames.len().saturating_sub(1)] {
            prefix.push_str(&frame.node);
            prefix.push('.');
            if let Some(branch) = &frame.branch {
                prefix.push_str(branch);
                prefix.push('.');
            }
        }
        prefix
    }

    /// Execution id of the current node.
    #[must_use]
    pub fn exec_id(&self) -> String {
        format!("{}{}", self.level_prefix(), self.node())
    }

    /// Execution id of another node at the current level.
    #[must_use]
    pub fn sibling_exec_id(&self, node: &str) -> String {
        format!("{}{node}", self.level_prefix())
    }

    /// Returns the position of another node at the current level.
    #[must_use]
    pub fn sibling(&self, node: impl Into<String>) -> Self {
        let mut next = self.clone();
        if let Some(last) = next.frames.last_mut() {
            *last = Frame::new(node);
        }
        next
    }

    /// Descends into the sub-DAG of the current node.
    ///
    /// `branch` names the dynamic branch; `None` enters a plain sub-DAG.
    #[must_use]
    pub fn enter(&self, branch: Option<String>, node: impl Into<String>) -> Self {
        let mut next = self.clone();
        if let Some(last) = next.frames.last_mut() {
            last.branch = branch;
        }
        next.frames.push(Frame::new(node));
        next
    }

    /// Climbs to the node owning the current level, or `None` at depth 0.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.frames.len() < 2 {
            return None;
        }
        let mut up = self.clone();
        up.frames.pop();
        if let Some(last) = up.frames.last_mut() {
            last.branch = None;
        }
        Some(up)
    }

    /// Walks `root` along the frames and returns the DAG and node of the
    /// current level.
    pub fn resolve<'a>(&self, root: &'a Dag) -> Result<(&'a Dag, &'a Node), DagError> {
        let mut dag = root;
        let last = self.frames.len().saturating_sub(1);
        for (i, frame) in self.frames.iter().enumerate() {
            let node = dag
                .node(&frame.node)
                .ok_or_else(|| DagError::UnknownNode(self.frames_path(i)))?;
            if i == last {
                return Ok((dag, node));
            }
            dag = match (node.kind(), frame.branch.as_deref()) {
                (NodeKind::SubDag(sub), None) => sub.as_ref(),
                (NodeKind::Foreach { dag: sub, .. }, Some(_)) => sub.as_ref(),
                (NodeKind::Condition { dags, .. }, Some(branch)) => {
                    dags.get(branch).ok_or_else(|| {
                        DagError::UnknownNode(format!("{}.{branch}", self.frames_path(i)))
                    })?
                }
                _ => return Err(DagError::UnknownNode(self.frames_path(i + 1))),
            };
        }
        Err(DagError::Empty)
    }

    fn frames_path(&self, upto: usize) -> String {
        let mut path = Self {
            frames: self.frames[..=upto.min(self.frames.len().saturating_sub(1))].to_vec(),
        };
        if let Some(last) = path.frames.last_mut() {
            last.branch = None;
        }
        path.exec_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Operation;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn branch_dag() -> Dag {
        let mut inner = Dag::new();
        inner.add_edge("x", "y").unwrap();

        let mut dags = BTreeMap::new();
        dags.insert("even".to_string(), inner.clone());
        dags.insert("odd".to_string(), inner);

        let mut dag = Dag::new();
        dag.add_vertex("A", vec![Operation::function("f")]).unwrap();
        dag.add_edge("A", "D").unwrap();
        dag.add_condition("D", |_| None, dags).unwrap();
        dag.add_edge("D", "E").unwrap();
        dag
    }

    #[test]
    fn test_root_position() {
        let pos = ExecutionPosition::root("A");
        assert_eq!(pos.depth(), 0);
        assert_eq!(pos.exec_id(), "A");
        assert_eq!(pos.level_prefix(), "");
        assert!(pos.parent().is_none());
        assert!(pos.branch().is_none());
    }

    #[test]
    fn test_branch_exec_ids() {
        let pos = ExecutionPosition::root("D").enter(Some("even".to_string()), "x");
        assert_eq!(pos.depth(), 1);
        assert_eq!(pos.exec_id(), "D.even.x");
        assert_eq!(pos.branch(), Some("even"));
        assert_eq!(pos.sibling_exec_id("y"), "D.even.y");

        let parent = pos.parent().unwrap();
        assert_eq!(parent, ExecutionPosition::root("D"));
    }

    #[test]
    fn test_plain_sub_dag_exec_ids() {
        let pos = ExecutionPosition::root("S").enter(None, "x").sibling("y");
        assert_eq!(pos.exec_id(), "S.y");
        assert!(pos.branch().is_none());
    }

    #[test]
    fn test_resolve_nested_position() {
        let dag = branch_dag();
        let pos = ExecutionPosition::root("D").enter(Some("odd".to_string()), "y");
        let (level, node) = pos.resolve(&dag).unwrap();
        assert_eq!(node.id(), "y");
        assert_eq!(level.len(), 2);

        let (_, top) = ExecutionPosition::root("E").resolve(&dag).unwrap();
        assert_eq!(top.id(), "E");
    }

    #[test]
    fn test_resolve_rejects_unknown_frames() {
        let dag = branch_dag();
        let err = ExecutionPosition::root("Z").resolve(&dag).unwrap_err();
        assert_eq!(err, DagError::UnknownNode("Z".to_string()));

        let err = ExecutionPosition::root("D")
            .enter(Some("maybe".to_string()), "x")
            .resolve(&dag)
            .unwrap_err();
        assert_eq!(err, DagError::UnknownNode("D.maybe".to_string()));

        // an operation node has no sub-DAG to descend into
        let err = ExecutionPosition::root("A").enter(None, "x").resolve(&dag).unwrap_err();
        assert!(matches!(err, DagError::UnknownNode(_)));
    }

    #[test]
    fn test_position_serializes_as_frame_list() {
        let pos = ExecutionPosition::root("D").enter(Some("even".to_string()), "x");
        let json = serde_json::to_value(&pos).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"node": "D", "branch": "even"}, {"node": "x"}])
        );
        let back: ExecutionPosition = serde_json::from_value(json).unwrap();
        assert_eq!(back, pos);
    }
}
