//! Request lifecycle: state queries, pause, resume and stop.

use tracing::info;

use super::fanin::update_with_retry;
use super::{FlowExecutor, PAUSED_CONTINUATIONS_KEY, REQUEST_STATE_KEY};
use crate::context::Continuation;
use crate::core::RequestState;
use crate::errors::{FlowError, StoreError};
use crate::events::{self, FlowEvent};
use crate::pipeline::{build_pipeline, DagDescription, DefinitionContext};
use crate::store::StateStore;
use crate::utils::new_request_id;

impl FlowExecutor {
    /// Returns the lifecycle state of a request.
    ///
    /// Requests that completed or failed have had their state removed and
    /// report [`StoreError::NotFound`].
    pub async fn state(&self, request_id: &str) -> Result<RequestState, FlowError> {
        let (state, _) = self.stores(request_id);
        let raw = state.get(REQUEST_STATE_KEY).await?;
        raw.parse().map_err(FlowError::Internal)
    }

    /// Describes the DAG the flow definition builds for `query`.
    pub fn describe(&self, query: &str) -> Result<DagDescription, FlowError> {
        let ctx = DefinitionContext::new(new_request_id(), query);
        Ok(build_pipeline(self.definition.as_ref(), &ctx)?.dag().describe())
    }

    /// Pauses a running request. Hops arriving while paused are parked and
    /// replayed by [`FlowExecutor::resume`].
    pub async fn pause(&self, request_id: &str) -> Result<(), FlowError> {
        let (state, _) = self.stores(request_id);
        if let Err(e) = state.get(PAUSED_CONTINUATIONS_KEY).await {
            if !e.is_not_found() {
                return Err(e.into());
            }
            state.set(PAUSED_CONTINUATIONS_KEY, "[]").await?;
        }
        self.transition(
            state.as_ref(),
            request_id,
            RequestState::Running,
            RequestState::Paused,
        )
        .await?;
        info!(request_id, "request paused");
        Ok(())
    }

    /// Resumes a paused request and re-forwards every parked hop.
    /// Returns how many hops were replayed.
    pub async fn resume(&self, request_id: &str) -> Result<usize, FlowError> {
        let (state, _) = self.stores(request_id);
        self.transition(
            state.as_ref(),
            request_id,
            RequestState::Paused,
            RequestState::Running,
        )
        .await?;

        let parked = match update_with_retry(
            state.as_ref(),
            PAUSED_CONTINUATIONS_KEY,
            &self.config.counter_retry,
            |_| Ok("[]".to_string()),
        )
        .await
        {
            Ok((previous, _)) => serde_json::from_str::<Vec<Continuation>>(&previous)?,
            Err(FlowError::Store(e)) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        for continuation in &parked {
            self.transport
                .forward(&self.config.flow_name, continuation)
                .await?;
        }
        info!(request_id, replayed = parked.len(), "request resumed");
        Ok(parked.len())
    }

    /// Stops a request and clears its stores.
    ///
    /// The request is marked stopped before its stores are removed, so hops
    /// still in flight see a non-running state either way and do nothing.
    /// Nothing is left behind once the stores are gone.
    pub async fn stop(&self, request_id: &str) -> Result<(), FlowError> {
        let (state, data) = self.stores(request_id);
        // fails with NotFound for unknown or finished requests
        state.get(REQUEST_STATE_KEY).await?;

        state
            .set(REQUEST_STATE_KEY, RequestState::Stopped.as_str())
            .await?;
        self.cleanup(state.as_ref(), data.as_ref()).await;
        self.events.emit(&FlowEvent::new(
            events::PIPELINE_STOPPED,
            &self.config.flow_name,
            request_id,
        ));
        info!(request_id, "request stopped");
        Ok(())
    }

    /// Appends a continuation to the parked list of a paused request.
    pub(crate) async fn park(
        &self,
        state: &dyn StateStore,
        continuation: &Continuation,
    ) -> Result<(), FlowError> {
        update_with_retry(
            state,
            PAUSED_CONTINUATIONS_KEY,
            &self.config.counter_retry,
            |current| {
                let mut parked: Vec<Continuation> = serde_json::from_str(current)?;
                parked.push(continuation.clone());
                Ok(serde_json::to_string(&parked)?)
            },
        )
        .await?;
        Ok(())
    }

    async fn transition(
        &self,
        state: &dyn StateStore,
        request_id: &str,
        from: RequestState,
        to: RequestState,
    ) -> Result<(), FlowError> {
        match state
            .update(REQUEST_STATE_KEY, from.as_str(), to.as_str())
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict { .. }) => {
                let current: RequestState = state
                    .get(REQUEST_STATE_KEY)
                    .await?
                    .parse()
                    .map_err(FlowError::Internal)?;
                Err(FlowError::InvalidState {
                    request_id: request_id.to_string(),
                    state: current,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{diamond, HopHarness};

    #[test]
    fn test_describe_builds_definition() {
        let executor = HopHarness::new(diamond()).executor().unwrap();
        let description = executor.describe("").unwrap();
        let ids: Vec<_> = description.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        assert_eq!(description.edges.len(), 4);
    }
}
