//! Branch dispatch for condition and foreach nodes.

use std::collections::BTreeSet;
use tracing::debug;

use super::{ExecutionOutcome, FlowExecutor, Hop};
use crate::context::{ExecutionPosition, PipelineState};
use crate::errors::{DagError, DynamicNodeError, FlowError};
use crate::events;
use crate::pipeline::{Dag, Node, NodeKind};
use crate::utils::is_valid_id;

/// One selected branch: its key, its sub-DAG and its raw input.
type Branch<'a> = (String, &'a Dag, Vec<u8>);

fn select_branches<'a>(
    exec: &str,
    node: &'a Node,
    input: &[u8],
) -> Result<Vec<Branch<'a>>, FlowError> {
    let check_key = |branch: &str| {
        if is_valid_id(branch) {
            Ok(())
        } else {
            Err(DynamicNodeError::InvalidBranchKey {
                node: exec.to_string(),
                branch: branch.to_string(),
            })
        }
    };

    match node.kind() {
        NodeKind::Condition { condition, dags } => {
            let keys = condition(input).ok_or_else(|| DynamicNodeError::NilResult {
                node: exec.to_string(),
                construct: "condition",
            })?;
            if keys.is_empty() {
                return Err(DynamicNodeError::NoBranches {
                    node: exec.to_string(),
                    construct: "condition",
                }
                .into());
            }
            let mut seen = BTreeSet::new();
            let mut branches = Vec::with_capacity(keys.len());
            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                check_key(&key)?;
                let dag = dags.get(&key).ok_or_else(|| DynamicNodeError::UnknownBranch {
                    node: exec.to_string(),
                    branch: key.clone(),
                })?;
                branches.push((key, dag, input.to_vec()));
            }
            Ok(branches)
        }
        NodeKind::Foreach { foreach, dag } => {
            let items = foreach(input).ok_or_else(|| DynamicNodeError::NilResult {
                node: exec.to_string(),
                construct: "foreach",
            })?;
            if items.is_empty() {
                return Err(DynamicNodeError::NoBranches {
                    node: exec.to_string(),
                    construct: "foreach",
                }
                .into());
            }
            items
                .into_iter()
                .map(|(key, value)| {
                    check_key(&key)?;
                    Ok((key, dag.as_ref(), value))
                })
                .collect()
        }
        other => Err(FlowError::Internal(format!(
            "node '{exec}' of kind {} cannot dispatch branches",
            other.name()
        ))),
    }
}

impl FlowExecutor {
    /// Evaluates a dynamic node and forwards one continuation per branch.
    ///
    /// Every store write (counter, options, join counters, branch inputs)
    /// happens before the first continuation is sealed.
    pub(crate) async fn dispatch(
        &self,
        hop: &Hop,
        position: &ExecutionPosition,
        node: &Node,
        input: &[u8],
    ) -> Result<ExecutionOutcome, FlowError> {
        let exec = position.exec_id();
        let branches = select_branches(&exec, node, input)?;
        let keys: Vec<&str> = branches.iter().map(|(key, _, _)| key.as_str()).collect();
        debug!(node = %exec, branches = ?keys, "dispatching branches");

        if branches.len() > 1 {
            self.require_shared_state(hop, &exec)?;
        }
        hop.state
            .set(&format!("{exec}-branch-completion"), "0")
            .await?;
        hop.state
            .set(
                &format!("{exec}-dynamic-branch-options"),
                &serde_json::to_string(&keys)?,
            )
            .await?;

        let mut outgoing = Vec::with_capacity(branches.len());
        for (branch, dag, branch_input) in &branches {
            let start = dag.start().ok_or(DagError::Empty)?;
            let branch_position = position.enter(Some(branch.clone()), start.id());
            self.init_join_counters(hop, dag, &branch_position.level_prefix())
                .await?;

            let state = match node.branch_forwarder() {
                Some(forward) => {
                    let key = format!("{exec}.{branch}-branch-input");
                    hop.data
                        .set(&key, &forward(branch_input).unwrap_or_default())
                        .await?;
                    PipelineState::stored(branch_position, key)
                }
                None => PipelineState::inline(branch_position),
            };
            outgoing.push((state, Vec::new()));
        }

        let count = self.send(hop, outgoing).await?;
        for (branch, _, _) in &branches {
            self.emit_node(
                hop,
                events::BRANCH_DISPATCHED,
                &exec,
                serde_json::json!({ "branch": branch }),
            );
        }
        Ok(ExecutionOutcome::Forwarded(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Operation;
    use std::collections::BTreeMap;

    fn inner() -> Dag {
        let mut dag = Dag::new();
        dag.add_vertex("x", vec![Operation::function("f")]).unwrap();
        dag
    }

    fn condition_dag(select: fn(&[u8]) -> Option<Vec<String>>) -> Dag {
        let mut dags = BTreeMap::new();
        dags.insert("even".to_string(), inner());
        dags.insert("odd".to_string(), inner());
        let mut dag = Dag::new();
        dag.add_condition("D", select, dags).unwrap();
        dag
    }

    #[test]
    fn test_condition_selects_named_branches() {
        let dag = condition_dag(|_| Some(vec!["even".to_string(), "even".to_string()]));
        let branches = select_branches("D", dag.node("D").unwrap(), b"4").unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].0, "even");
        assert_eq!(branches[0].2, b"4".to_vec());
    }

    #[test]
    fn test_condition_contract_violations() {
        let dag = condition_dag(|_| None);
        let err = select_branches("D", dag.node("D").unwrap(), b"").unwrap_err();
        assert!(matches!(
            err,
            FlowError::Dynamic(DynamicNodeError::NilResult { construct: "condition", .. })
        ));

        let dag = condition_dag(|_| Some(Vec::new()));
        let err = select_branches("D", dag.node("D").unwrap(), b"").unwrap_err();
        assert!(matches!(err, FlowError::Dynamic(DynamicNodeError::NoBranches { .. })));

        let dag = condition_dag(|_| Some(vec!["prime".to_string()]));
        let err = select_branches("D", dag.node("D").unwrap(), b"").unwrap_err();
        assert!(matches!(
            err,
            FlowError::Dynamic(DynamicNodeError::UnknownBranch { ref branch, .. }) if branch == "prime"
        ));
    }

    #[test]
    fn test_foreach_rejects_invalid_keys() {
        let mut dag = Dag::new();
        dag.add_foreach(
            "F",
            |_| {
                let mut items = BTreeMap::new();
                items.insert("a b".to_string(), Vec::new());
                Some(items)
            },
            inner(),
        )
        .unwrap();
        let err = select_branches("F", dag.node("F").unwrap(), b"").unwrap_err();
        assert!(matches!(
            err,
            FlowError::Dynamic(DynamicNodeError::InvalidBranchKey { ref branch, .. }) if branch == "a b"
        ));
    }

    #[test]
    fn test_foreach_splits_input() {
        let mut dag = Dag::new();
        dag.add_foreach(
            "F",
            |input| {
                Some(
                    input
                        .split(|b| *b == b',')
                        .map(|part| (String::from_utf8_lossy(part).into_owned(), part.to_vec()))
                        .collect(),
                )
            },
            inner(),
        )
        .unwrap();
        let branches = select_branches("F", dag.node("F").unwrap(), b"A,B,C").unwrap();
        let keys: Vec<_> = branches.iter().map(|(k, _, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
        assert_eq!(branches[1].2, b"B".to_vec());
    }
}
