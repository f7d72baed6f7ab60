//! reqwest-backed invoker and transport.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::instrument;

use super::{ContinuationTransport, FunctionInvoker, InvocationResponse};
use crate::context::Continuation;
use crate::core::{Operation, OperationKind};
use crate::errors::{FlowError, InvocationError, TransportError};

fn build_client(timeout: Duration) -> Result<Client, FlowError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| FlowError::Config(format!("failed to build HTTP client: {e}")))
}

fn trim_gateway(gateway: &str) -> String {
    gateway.trim_end_matches('/').to_string()
}

/// Invokes functions through the gateway and callbacks directly.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: Client,
    gateway: String,
}

impl HttpInvoker {
    /// Creates an invoker for `gateway` with a request timeout.
    pub fn new(gateway: &str, timeout: Duration) -> Result<Self, FlowError> {
        Ok(Self::with_client(build_client(timeout)?, gateway))
    }

    /// Creates an invoker from an existing client.
    #[must_use]
    pub fn with_client(client: Client, gateway: &str) -> Self {
        Self {
            client,
            gateway: trim_gateway(gateway),
        }
    }

    /// Returns the URL an operation is sent to.
    pub fn url_for(&self, operation: &Operation) -> Result<String, InvocationError> {
        match operation.kind() {
            OperationKind::Function { name } => Ok(format!("{}/function/{name}", self.gateway)),
            OperationKind::Callback { url } => Ok(url.clone()),
            OperationKind::Modifier { .. } => Err(InvocationError::Request {
                url: String::new(),
                message: "modifiers run in-process".to_string(),
            }),
        }
    }
}

#[async_trait]
impl FunctionInvoker for HttpInvoker {
    #[instrument(name = "hopflow.invoke", skip(self, operation, input), fields(op = %operation.description()))]
    async fn invoke(
        &self,
        operation: &Operation,
        input: &[u8],
    ) -> Result<InvocationResponse, InvocationError> {
        let url = self.url_for(operation)?;
        let mut builder = self.client.post(&url).body(input.to_vec());
        for (name, value) in operation.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !operation.query().is_empty() {
            builder = builder.query(operation.query());
        }

        let response = builder.send().await.map_err(|e| InvocationError::Request {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(|e| InvocationError::Request {
            url,
            message: e.to_string(),
        })?;

        Ok(InvocationResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Posts continuations to `<gateway>/flow/<flow>/forward`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    gateway: String,
}

impl HttpTransport {
    /// Creates a transport for `gateway` with a request timeout.
    pub fn new(gateway: &str, timeout: Duration) -> Result<Self, FlowError> {
        Ok(Self::with_client(build_client(timeout)?, gateway))
    }

    /// Creates a transport from an existing client.
    #[must_use]
    pub fn with_client(client: Client, gateway: &str) -> Self {
        Self {
            client,
            gateway: trim_gateway(gateway),
        }
    }

    /// Returns the forward endpoint of a flow.
    #[must_use]
    pub fn forward_url(&self, flow_name: &str) -> String {
        format!("{}/flow/{flow_name}/forward", self.gateway)
    }
}

#[async_trait]
impl ContinuationTransport for HttpTransport {
    #[instrument(name = "hopflow.forward", skip(self, continuation), fields(request_id = %continuation.id))]
    async fn forward(
        &self,
        flow_name: &str,
        continuation: &Continuation,
    ) -> Result<(), TransportError> {
        let url = self.forward_url(flow_name);
        let response = self
            .client
            .post(&url)
            .json(continuation)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            url,
            status: status.as_u16(),
            body,
        })
    }
}
