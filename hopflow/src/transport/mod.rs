//! The two network seams of the executor.
//!
//! [`FunctionInvoker`] runs remote operations; [`ContinuationTransport`]
//! hands continuations to the next hop. Both have reqwest-backed
//! implementations in [`http`].

pub mod http;

pub use self::http::{HttpInvoker, HttpTransport};

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::context::Continuation;
use crate::core::Operation;
use crate::errors::{InvocationError, TransportError};

/// The raw response of a function or callback invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers with lowercase names.
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl InvocationResponse {
    /// Creates a 200 response carrying `body`.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Creates a response with an arbitrary status.
    #[must_use]
    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Invokes function and callback operations.
///
/// Implementations return `Ok` for any HTTP answer, including error
/// statuses; the executor decides what a status means.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    /// Sends `input` to the operation's target.
    async fn invoke(
        &self,
        operation: &Operation,
        input: &[u8],
    ) -> Result<InvocationResponse, InvocationError>;
}

/// Delivers continuations to the forward endpoint of a flow.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContinuationTransport: Send + Sync {
    /// Forwards one continuation; non-2xx answers are errors.
    async fn forward(
        &self,
        flow_name: &str,
        continuation: &Continuation,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        assert!(InvocationResponse::ok("x").is_success());
        assert!(InvocationResponse::with_status(204, "").is_success());
        assert!(!InvocationResponse::with_status(302, "").is_success());
        assert!(!InvocationResponse::with_status(500, "boom").is_success());
    }
}
