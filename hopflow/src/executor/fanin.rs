//! Join bookkeeping: completion counters and fan-in aggregation.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{FlowExecutor, Hop};
use crate::context::ExecutionPosition;
use crate::errors::{CoordinationError, FlowError, OperationError, StoreError};
use crate::events;
use crate::pipeline::{with_retry, Dag, Node, RetryConfig, RetryError};
use crate::store::StateStore;

/// Reads `key`, computes the next value and writes it back with
/// compare-and-swap, retrying on conflicts. Returns `(previous, next)`.
pub(crate) async fn update_with_retry<F>(
    store: &dyn StateStore,
    key: &str,
    retry: &RetryConfig,
    compute: F,
) -> Result<(String, String), FlowError>
where
    F: Fn(&str) -> Result<String, FlowError>,
{
    let compute = &compute;
    let result = with_retry(
        retry,
        key,
        |e: &FlowError| matches!(e, FlowError::Store(StoreError::Conflict { .. })),
        move || async move {
            let current = store.get(key).await?;
            let next = compute(&current)?;
            store.update(key, &current, &next).await?;
            Ok::<_, FlowError>((current, next))
        },
    )
    .await;

    match result {
        Ok(values) => Ok(values),
        Err(RetryError::Exhausted { attempts, .. }) => Err(CoordinationError::CounterExhausted {
            key: key.to_string(),
            attempts,
        }
        .into()),
        Err(RetryError::Aborted(e)) => Err(e),
    }
}

/// Atomically increments a counter and returns the new value.
pub(crate) async fn increment_counter(
    store: &dyn StateStore,
    key: &str,
    retry: &RetryConfig,
) -> Result<usize, FlowError> {
    let parse = |raw: &str| {
        raw.trim()
            .parse::<usize>()
            .map_err(|_| CoordinationError::InvalidCounter {
                key: key.to_string(),
                value: raw.to_string(),
            })
    };
    let (_, next) =
        update_with_retry(store, key, retry, |current| Ok((parse(current)? + 1).to_string()))
            .await?;
    Ok(parse(&next)?)
}

fn join_key(exec_id: &str) -> String {
    format!("{exec_id}-join-completion")
}

fn missing_data(key: String) -> impl FnOnce(StoreError) -> FlowError {
    move |e| {
        if e.is_not_found() {
            CoordinationError::MissingData { key }.into()
        } else {
            e.into()
        }
    }
}

impl FlowExecutor {
    /// Sets the completion counter of every join node of `dag` to zero.
    pub(crate) async fn init_join_counters(
        &self,
        hop: &Hop,
        dag: &Dag,
        prefix: &str,
    ) -> Result<(), FlowError> {
        for node in dag.nodes().filter(|n| n.indegree() > 1) {
            hop.state
                .set(&join_key(&format!("{prefix}{}", node.id())), "0")
                .await?;
        }
        Ok(())
    }

    /// Fails when a fan-in would rely on a store that travels inside
    /// continuations, since concurrent hops would each see their own copy.
    pub(crate) fn require_shared_state(&self, hop: &Hop, node: &str) -> Result<(), FlowError> {
        if hop.state.export().is_some() {
            return Err(CoordinationError::EmbeddedStateStore {
                node: node.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Records that `node` finished for the join `child`. Returns the
    /// aggregated input when this parent is the last one to arrive.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn join_parent(
        &self,
        hop: &Hop,
        position: &ExecutionPosition,
        dag: &Dag,
        node: &Node,
        child: &Node,
        forwards: bool,
        shaped: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, FlowError> {
        let child_exec = position.sibling_exec_id(child.id());
        self.require_shared_state(hop, &child_exec)?;

        let own = shaped.unwrap_or_default();
        if forwards {
            let key = format!("{}--{child_exec}", position.exec_id());
            hop.data.set(&key, &own).await?;
        }

        let arrived =
            increment_counter(hop.state.as_ref(), &join_key(&child_exec), &self.config.counter_retry)
                .await?;
        let expected = child.indegree();
        if arrived < expected {
            debug!(join = %child_exec, arrived, expected, "join waiting");
            self.emit_node(
                hop,
                events::JOIN_WAITING,
                &child_exec,
                serde_json::json!({ "arrived": arrived, "expected": expected }),
            );
            return Ok(None);
        }
        if arrived > expected {
            warn!(join = %child_exec, arrived, expected, "join already released");
            return Ok(None);
        }

        let mut inputs = BTreeMap::new();
        for parent in dag.parents(child) {
            if dag.edge_forwarder(parent.id(), child.id()).is_none() {
                continue;
            }
            let value = if parent.id() == node.id() {
                own.clone()
            } else {
                let key = format!("{}--{child_exec}", position.sibling_exec_id(parent.id()));
                hop.data.get(&key).await.map_err(missing_data(key))?
            };
            inputs.insert(parent.id().to_string(), value);
        }

        let aggregate = match child.aggregator() {
            Some(aggregate) => aggregate(&inputs)
                .map_err(|e| OperationError::new(&child_exec, 0, "aggregator", e))?
                .unwrap_or_default(),
            None => inputs.into_values().next().unwrap_or_default(),
        };
        self.emit_node(
            hop,
            events::JOIN_COMPLETED,
            &child_exec,
            serde_json::json!({ "parents": expected }),
        );
        Ok(Some(aggregate))
    }

    /// Records that a branch of the dynamic node at `parent` finished.
    /// Returns the sub-aggregated output once every branch is done.
    pub(crate) async fn join_branch(
        &self,
        hop: &Hop,
        position: &ExecutionPosition,
        parent: &ExecutionPosition,
        owner: &Node,
        output: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, FlowError> {
        let exec = parent.exec_id();
        let branch = position
            .branch()
            .ok_or_else(|| FlowError::Internal(format!("position {} has no branch", position.exec_id())))?
            .to_string();

        let options_key = format!("{exec}-dynamic-branch-options");
        let raw = hop.state.get(&options_key).await.map_err(|e| {
            if e.is_not_found() {
                FlowError::from(CoordinationError::MissingBranchOptions {
                    key: options_key.clone(),
                })
            } else {
                e.into()
            }
        })?;
        let options: Vec<String> = serde_json::from_str(&raw).map_err(|_| {
            CoordinationError::MissingBranchOptions {
                key: options_key.clone(),
            }
        })?;

        if owner.sub_aggregator().is_some() {
            hop.data
                .set(&format!("{exec}.{branch}-branch-result"), &output)
                .await?;
        }

        if options.len() > 1 {
            self.require_shared_state(hop, &exec)?;
            let done = increment_counter(
                hop.state.as_ref(),
                &format!("{exec}-branch-completion"),
                &self.config.counter_retry,
            )
            .await?;
            if done < options.len() {
                debug!(node = %exec, done, total = options.len(), "branch join waiting");
                self.emit_node(
                    hop,
                    events::JOIN_WAITING,
                    &exec,
                    serde_json::json!({ "arrived": done, "expected": options.len(), "branch": branch }),
                );
                return Ok(None);
            }
            if done > options.len() {
                warn!(node = %exec, done, "branch join already released");
                return Ok(None);
            }
        }

        let aggregate = match owner.sub_aggregator() {
            Some(aggregate) => {
                let mut results = BTreeMap::new();
                for key in &options {
                    let value = if *key == branch {
                        output.clone()
                    } else {
                        let data_key = format!("{exec}.{key}-branch-result");
                        hop.data.get(&data_key).await.map_err(missing_data(data_key))?
                    };
                    results.insert(key.clone(), value);
                }
                aggregate(&results)
                    .map_err(|e| OperationError::new(&exec, 0, "sub-aggregator", e))?
                    .unwrap_or_default()
            }
            None => Vec::new(),
        };
        self.emit_node(
            hop,
            events::JOIN_COMPLETED,
            &exec,
            serde_json::json!({ "branches": options.len() }),
        );
        Ok(Some(aggregate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EmbeddedStateStore, MemoryStateStore};
    use std::sync::Arc;

    fn scoped() -> Arc<dyn StateStore> {
        MemoryStateStore::new().configure("flow", "req")
    }

    #[tokio::test]
    async fn test_increment_counter() {
        let store = scoped();
        store.set("k", "0").await.unwrap();
        let retry = RetryConfig::default();

        assert_eq!(increment_counter(store.as_ref(), "k", &retry).await.unwrap(), 1);
        assert_eq!(increment_counter(store.as_ref(), "k", &retry).await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap(), "2");
    }

    #[tokio::test]
    async fn test_increment_rejects_non_numeric_counter() {
        let store = scoped();
        store.set("k", "many").await.unwrap();
        let err = increment_counter(store.as_ref(), "k", &RetryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::Coordination(CoordinationError::InvalidCounter { ref value, .. }) if value == "many"
        ));
    }

    #[tokio::test]
    async fn test_increment_missing_counter_is_store_error() {
        let store = scoped();
        let err = increment_counter(store.as_ref(), "absent", &RetryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = scoped();
        store.set("k", "0").await.unwrap();
        let retry = RetryConfig::default().with_max_attempts(1000).with_base_delay_ms(0);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let retry = retry.clone();
            handles.push(tokio::spawn(async move {
                increment_counter(store.as_ref(), "k", &retry).await.unwrap()
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=16).collect::<Vec<_>>());
        assert_eq!(store.get("k").await.unwrap(), "16");
    }

    #[tokio::test]
    async fn test_update_with_retry_returns_previous_value() {
        let store = EmbeddedStateStore::new().configure("flow", "req");
        store.set("list", "[1]").await.unwrap();
        let (previous, next) =
            update_with_retry(store.as_ref(), "list", &RetryConfig::default(), |_| {
                Ok("[]".to_string())
            })
            .await
            .unwrap();
        assert_eq!(previous, "[1]");
        assert_eq!(next, "[]");
    }
}
