//! Fresh requests entering the executor.

use serde::{Deserialize, Serialize};

use super::Signer;

/// A fresh pipeline request as received by the execute endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequest {
    /// The request body handed to the start node.
    #[serde(with = "super::continuation::base64_bytes")]
    pub data: Vec<u8>,
    /// The raw query string.
    #[serde(default)]
    pub query: String,
    /// `sha256=<hex>` signature of `data`, checked when an auth secret is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_signature: Option<String>,
}

impl RawRequest {
    /// Creates a request carrying `data`.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Sets the query string.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Sets the auth signature.
    #[must_use]
    pub fn with_auth_signature(mut self, signature: impl Into<String>) -> Self {
        self.auth_signature = Some(signature.into());
        self
    }

    /// Signs the body with `signer`.
    #[must_use]
    pub fn signed_with(self, signer: &Signer) -> Self {
        let signature = signer.sign(&self.data);
        self.with_auth_signature(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_request_verifies() {
        let signer = Signer::new("auth");
        let req = RawRequest::new("5").with_query("mode=fast").signed_with(&signer);

        assert_eq!(req.query, "mode=fast");
        let sig = req.auth_signature.as_deref().unwrap();
        signer.verify(&req.data, sig).unwrap();
    }

    #[test]
    fn test_request_json_shape() {
        let req = RawRequest::new("hi");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, serde_json::json!({"data": "aGk=", "query": ""}));
    }
}
