//! Pipelines and the user code that defines them.
//!
//! The DAG never crosses the wire. Every hop re-runs the flow's
//! [`FlowDefinition`] to rebuild the same [`Pipeline`], then resumes at the
//! execution position carried by the continuation.

use std::fmt;
use std::sync::Arc;

use super::Dag;
use crate::context::ExecutionPosition;
use crate::core::TerminalState;
use crate::errors::{DagError, FlowError};

/// Turns a pipeline error into a terminal payload, or `None` to fail.
pub type PipelineFailureFn = Arc<dyn Fn(&FlowError) -> Option<Vec<u8>> + Send + Sync>;

/// Observes the terminal state of a request.
pub type FinallyFn = Arc<dyn Fn(TerminalState) + Send + Sync>;

/// A DAG plus its execution position and pipeline-level handlers.
#[derive(Clone, Default)]
pub struct Pipeline {
    dag: Dag,
    position: Option<ExecutionPosition>,
    on_failure: Option<PipelineFailureFn>,
    finally: Option<FinallyFn>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the DAG.
    #[must_use]
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Returns the DAG for definition calls.
    pub fn dag_mut(&mut self) -> &mut Dag {
        &mut self.dag
    }

    /// Sets the pipeline-level failure handler.
    pub fn on_failure<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&FlowError) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    /// Sets the handler called once with the terminal state.
    pub fn finally<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(TerminalState) + Send + Sync + 'static,
    {
        self.finally = Some(Arc::new(handler));
        self
    }

    /// Returns the failure handler.
    #[must_use]
    pub fn failure_handler(&self) -> Option<&PipelineFailureFn> {
        self.on_failure.as_ref()
    }

    /// Returns the finally handler.
    #[must_use]
    pub fn finally_handler(&self) -> Option<&FinallyFn> {
        self.finally.as_ref()
    }

    /// Returns the position of the node being executed, once set.
    #[must_use]
    pub fn position(&self) -> Option<&ExecutionPosition> {
        self.position.as_ref()
    }

    pub(crate) fn set_position(&mut self, position: ExecutionPosition) {
        self.position = Some(position);
    }

    /// Validates the DAG.
    pub fn validate(&self) -> Result<(), DagError> {
        self.dag.validate()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("dag", &self.dag)
            .field("position", &self.position)
            .field("on_failure", &self.on_failure.is_some())
            .field("finally", &self.finally.is_some())
            .finish()
    }
}

/// Request data available while defining a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionContext {
    /// The request id.
    pub request_id: String,
    /// The raw query string of the original request.
    pub query: String,
}

impl DefinitionContext {
    /// Creates a context.
    #[must_use]
    pub fn new(request_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            query: query.into(),
        }
    }

    /// Returns the first value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

/// User code building a flow's pipeline.
///
/// Must be deterministic for a given context: every hop of a request
/// rebuilds the pipeline and expects the same DAG.
pub trait FlowDefinition: Send + Sync {
    /// Populates `pipeline`.
    fn define(&self, pipeline: &mut Pipeline, ctx: &DefinitionContext) -> anyhow::Result<()>;
}

impl<F> FlowDefinition for F
where
    F: Fn(&mut Pipeline, &DefinitionContext) -> anyhow::Result<()> + Send + Sync,
{
    fn define(&self, pipeline: &mut Pipeline, ctx: &DefinitionContext) -> anyhow::Result<()> {
        self(pipeline, ctx)
    }
}

/// Runs `definition` and validates the result.
pub fn build_pipeline(
    definition: &dyn FlowDefinition,
    ctx: &DefinitionContext,
) -> Result<Pipeline, FlowError> {
    let mut pipeline = Pipeline::new();
    definition
        .define(&mut pipeline, ctx)
        .map_err(|e| FlowError::Definition(format!("{e:#}")))?;
    pipeline.validate()?;
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Operation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_definitions_build_pipelines() {
        let define = |p: &mut Pipeline, ctx: &DefinitionContext| -> anyhow::Result<()> {
            let width = ctx.query_param("width").unwrap_or("10").to_string();
            p.dag_mut()
                .add_vertex("A", vec![Operation::function("resize").with_query("w", width)])?;
            Ok(())
        };
        let ctx = DefinitionContext::new("req", "width=42&fast");
        let pipeline = build_pipeline(&define, &ctx).unwrap();

        let node = pipeline.dag().node("A").unwrap();
        assert_eq!(node.operations()[0].query().get("w").unwrap(), "42");
        assert!(pipeline.position().is_none());
    }

    #[test]
    fn test_definition_errors_are_reported() {
        let define = |_: &mut Pipeline, _: &DefinitionContext| -> anyhow::Result<()> {
            anyhow::bail!("missing config")
        };
        let err = build_pipeline(&define, &DefinitionContext::default()).unwrap_err();
        assert!(matches!(err, FlowError::Definition(ref m) if m.contains("missing config")));
    }

    #[test]
    fn test_invalid_dag_fails_build() {
        let define = |p: &mut Pipeline, _: &DefinitionContext| -> anyhow::Result<()> {
            p.dag_mut().add_edge("A", "B")?;
            p.dag_mut().add_edge("A", "C")?;
            Ok(())
        };
        let err = build_pipeline(&define, &DefinitionContext::default()).unwrap_err();
        assert!(matches!(err, FlowError::Dag(DagError::MultipleEnd(_))));
    }

    #[test]
    fn test_query_param() {
        let ctx = DefinitionContext::new("r", "a=1&flag&b=two");
        assert_eq!(ctx.query_param("a"), Some("1"));
        assert_eq!(ctx.query_param("flag"), Some(""));
        assert_eq!(ctx.query_param("b"), Some("two"));
        assert_eq!(ctx.query_param("c"), None);
    }

    #[test]
    fn test_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut pipeline = Pipeline::new();
        pipeline
            .on_failure(|_| Some(b"fallback".to_vec()))
            .finally(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        let handler = pipeline.failure_handler().unwrap();
        assert_eq!(handler(&FlowError::Internal("x".into())), Some(b"fallback".to_vec()));
        (pipeline.finally_handler().unwrap())(TerminalState::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
