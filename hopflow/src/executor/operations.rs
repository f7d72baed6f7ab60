//! Running the operation list of a node.

use tracing::{debug, warn};

use super::{FlowExecutor, Hop};
use crate::context::ExecutionPosition;
use crate::core::{Operation, OperationKind};
use crate::errors::{FlowError, InvocationError, OperationError};
use crate::events;
use crate::observability::{HopSpanAttributes, SpanTimer};
use crate::pipeline::Node;

impl FlowExecutor {
    /// Runs the operations of `node` in order, feeding each output to the
    /// next one. A node without operations passes its input through.
    pub(crate) async fn run_operations(
        &self,
        hop: &Hop,
        position: &ExecutionPosition,
        node: &Node,
        input: Vec<u8>,
    ) -> Result<Vec<u8>, FlowError> {
        let exec = position.exec_id();
        let attributes = HopSpanAttributes::new(&self.config.flow_name, &hop.request_id)
            .with_node(&exec, position.depth())
            .with_kind(node.kind().name());
        debug!(attributes = ?attributes.to_otel_attributes(), "running node");
        self.emit_node(
            hop,
            events::NODE_STARTED,
            &exec,
            serde_json::json!({ "operations": node.operations().len() }),
        );
        let timer = SpanTimer::start(exec.clone());

        let mut current = input;
        for (index, operation) in node.operations().iter().enumerate() {
            match self.run_operation(operation, &current).await {
                Ok(output) => current = output,
                Err(err) => {
                    let Some(handler) = operation.failure_handler() else {
                        return Err(
                            OperationError::new(&exec, index, operation.description(), err).into(),
                        );
                    };
                    match handler(err) {
                        None => {
                            warn!(node = %exec, index, "operation failure recovered");
                        }
                        Some(err) => {
                            return Err(OperationError::new(
                                &exec,
                                index,
                                operation.description(),
                                err,
                            )
                            .into());
                        }
                    }
                }
            }
        }

        self.emit_node(
            hop,
            events::NODE_COMPLETED,
            &exec,
            serde_json::json!({ "duration_ms": timer.elapsed_ms(), "bytes": current.len() }),
        );
        Ok(current)
    }

    async fn run_operation(&self, operation: &Operation, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        if let OperationKind::Modifier { transform } = operation.kind() {
            return Ok(transform(input)?.unwrap_or_default());
        }

        let response = self.invoker.invoke(operation, input).await?;
        if let Some(handler) = operation.response_handler() {
            return handler(response);
        }
        if !response.is_success() {
            return Err(InvocationError::Status {
                url: operation.description(),
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            }
            .into());
        }
        Ok(response.body)
    }
}
