//! The operation model: one unit of work attached to a node.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::transport::InvocationResponse;

/// An in-process byte transform. `None` is normalized to an empty output.
pub type ModifierFn = Arc<dyn Fn(&[u8]) -> anyhow::Result<Option<Vec<u8>>> + Send + Sync>;

/// Receives an operation error. Returning `None` recovers, `Some` re-raises.
pub type FailureHandlerFn = Arc<dyn Fn(anyhow::Error) -> Option<anyhow::Error> + Send + Sync>;

/// Replaces the default response-body extraction of a remote operation.
pub type ResponseHandlerFn =
    Arc<dyn Fn(InvocationResponse) -> anyhow::Result<Vec<u8>> + Send + Sync>;

/// What an operation does. Exactly one payload per case.
#[derive(Clone)]
pub enum OperationKind {
    /// Invoke a named function through the gateway.
    Function {
        /// The function name.
        name: String,
    },
    /// Invoke an arbitrary callback URL.
    Callback {
        /// The callback URL.
        url: String,
    },
    /// Apply an in-process transform.
    Modifier {
        /// The transform.
        transform: ModifierFn,
    },
}

impl fmt::Debug for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function { name } => f.debug_struct("Function").field("name", name).finish(),
            Self::Callback { url } => f.debug_struct("Callback").field("url", url).finish(),
            Self::Modifier { .. } => f.write_str("Modifier"),
        }
    }
}

/// A single step in a node's operation list.
#[derive(Clone)]
pub struct Operation {
    kind: OperationKind,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    on_failure: Option<FailureHandlerFn>,
    on_response: Option<ResponseHandlerFn>,
}

impl Operation {
    fn with_kind(kind: OperationKind) -> Self {
        Self {
            kind,
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            on_failure: None,
            on_response: None,
        }
    }

    /// Creates an operation invoking a named function.
    #[must_use]
    pub fn function(name: impl Into<String>) -> Self {
        Self::with_kind(OperationKind::Function { name: name.into() })
    }

    /// Creates an operation invoking a callback URL.
    #[must_use]
    pub fn callback(url: impl Into<String>) -> Self {
        Self::with_kind(OperationKind::Callback { url: url.into() })
    }

    /// Creates an in-process modifier.
    #[must_use]
    pub fn modifier<F>(transform: F) -> Self
    where
        F: Fn(&[u8]) -> anyhow::Result<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self::with_kind(OperationKind::Modifier {
            transform: Arc::new(transform),
        })
    }

    /// Adds a header sent with the HTTP call.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a query parameter sent with the HTTP call.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Sets the failure handler.
    #[must_use]
    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(anyhow::Error) -> Option<anyhow::Error> + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    /// Sets the response handler.
    #[must_use]
    pub fn on_response<F>(mut self, handler: F) -> Self
    where
        F: Fn(InvocationResponse) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.on_response = Some(Arc::new(handler));
        self
    }

    /// Returns the operation kind.
    #[must_use]
    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Returns the query parameters.
    #[must_use]
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Returns the failure handler, if any.
    #[must_use]
    pub fn failure_handler(&self) -> Option<&FailureHandlerFn> {
        self.on_failure.as_ref()
    }

    /// Returns the response handler, if any.
    #[must_use]
    pub fn response_handler(&self) -> Option<&ResponseHandlerFn> {
        self.on_response.as_ref()
    }

    /// Short description used in errors, logs and exports.
    #[must_use]
    pub fn description(&self) -> String {
        match &self.kind {
            OperationKind::Function { name } => format!("function:{name}"),
            OperationKind::Callback { url } => format!("callback:{url}"),
            OperationKind::Modifier { .. } => "modifier".to_string(),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("on_failure", &self.on_failure.is_some())
            .field("on_response", &self.on_response.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_operation() {
        let op = Operation::function("resize")
            .with_header("X-Trace", "1")
            .with_query("width", "100");

        assert!(matches!(op.kind(), OperationKind::Function { name } if name == "resize"));
        assert_eq!(op.headers().get("X-Trace"), Some(&"1".to_string()));
        assert_eq!(op.query().get("width"), Some(&"100".to_string()));
        assert_eq!(op.description(), "function:resize");
    }

    #[test]
    fn test_callback_operation() {
        let op = Operation::callback("http://hooks.local/done");
        assert_eq!(op.description(), "callback:http://hooks.local/done");
        assert!(op.failure_handler().is_none());
        assert!(op.response_handler().is_none());
    }

    #[test]
    fn test_modifier_operation_runs_transform() {
        let op = Operation::modifier(|data| Ok(Some(data.to_ascii_uppercase())));
        let OperationKind::Modifier { transform } = op.kind() else {
            panic!("expected modifier");
        };
        assert_eq!(transform(b"abc").unwrap(), Some(b"ABC".to_vec()));
    }

    #[test]
    fn test_handlers_are_attached() {
        let op = Operation::function("f")
            .on_failure(|_| None)
            .on_response(|resp| Ok(resp.body));
        assert!(op.failure_handler().is_some());
        assert!(op.response_handler().is_some());
        assert!(format!("{op:?}").contains("on_failure: true"));
    }
}
