//! Executor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::FlowError;
use crate::pipeline::RetryConfig;

/// Environment variable holding the gateway base URL.
pub const ENV_GATEWAY_URL: &str = "HOPFLOW_GATEWAY_URL";
/// Environment variable holding the continuation signing secret.
pub const ENV_STATE_SECRET: &str = "HOPFLOW_STATE_SECRET";
/// Environment variable holding the request auth secret.
pub const ENV_AUTH_SECRET: &str = "HOPFLOW_AUTH_SECRET";
/// Environment variable overriding the counter attempt bound.
pub const ENV_COUNTER_MAX_ATTEMPTS: &str = "HOPFLOW_COUNTER_MAX_ATTEMPTS";

fn default_gateway_url() -> String {
    "http://gateway:8080".to_string()
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

/// Settings for one flow's executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Flow name; namespaces store keys and names the forward endpoint.
    pub flow_name: String,
    /// Base URL of the function gateway.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Secret signing continuation states.
    #[serde(default)]
    pub state_secret: String,
    /// Secret verifying fresh request bodies; unset disables the check.
    #[serde(default)]
    pub auth_secret: Option<String>,
    /// Retry policy of the join and branch counters.
    #[serde(default)]
    pub counter_retry: RetryConfig,
    /// Timeout for invocations and forwards in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

impl ExecutorConfig {
    /// Creates a config with defaults for `flow_name`.
    #[must_use]
    pub fn new(flow_name: impl Into<String>) -> Self {
        Self {
            flow_name: flow_name.into(),
            gateway_url: default_gateway_url(),
            state_secret: String::new(),
            auth_secret: None,
            counter_retry: RetryConfig::default(),
            http_timeout_ms: default_http_timeout_ms(),
        }
    }

    /// Reads overrides from `HOPFLOW_*` environment variables.
    pub fn from_env(flow_name: impl Into<String>) -> Result<Self, FlowError> {
        Self::from_lookup(flow_name, |key| std::env::var(key).ok())
    }

    /// Like [`ExecutorConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(flow_name: impl Into<String>, lookup: F) -> Result<Self, FlowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(flow_name);
        if let Some(url) = lookup(ENV_GATEWAY_URL) {
            config.gateway_url = url;
        }
        if let Some(secret) = lookup(ENV_STATE_SECRET) {
            config.state_secret = secret;
        }
        config.auth_secret = lookup(ENV_AUTH_SECRET).filter(|s| !s.is_empty());
        if let Some(raw) = lookup(ENV_COUNTER_MAX_ATTEMPTS) {
            let attempts = raw.parse::<usize>().map_err(|e| {
                FlowError::Config(format!("{ENV_COUNTER_MAX_ATTEMPTS}='{raw}': {e}"))
            })?;
            config.counter_retry.max_attempts = attempts;
        }
        Ok(config)
    }

    /// Sets the gateway URL.
    #[must_use]
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    /// Sets the state signing secret.
    #[must_use]
    pub fn with_state_secret(mut self, secret: impl Into<String>) -> Self {
        self.state_secret = secret.into();
        self
    }

    /// Sets the request auth secret.
    #[must_use]
    pub fn with_auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }

    /// Sets the counter retry policy.
    #[must_use]
    pub fn with_counter_retry(mut self, retry: RetryConfig) -> Self {
        self.counter_retry = retry;
        self
    }

    /// Sets the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.http_timeout_ms = timeout_ms;
        self
    }

    /// Returns the HTTP timeout.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Checks the settings an executor cannot run without.
    pub fn validate(&self) -> Result<(), FlowError> {
        if !crate::utils::is_valid_id(&self.flow_name) {
            return Err(FlowError::Config(format!(
                "invalid flow name '{}'",
                self.flow_name
            )));
        }
        if self.state_secret.is_empty() {
            return Err(FlowError::Config("state secret is not set".to_string()));
        }
        if self.counter_retry.max_attempts == 0 {
            return Err(FlowError::Config(
                "counter retry needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::new("orders");
        assert_eq!(config.gateway_url, "http://gateway:8080");
        assert_eq!(config.counter_retry.max_attempts, 10);
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_err());
        assert!(config.with_state_secret("s").validate().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{"flow_name": "orders", "state_secret": "s"}"#).unwrap();
        assert_eq!(config, ExecutorConfig::new("orders").with_state_secret("s"));
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_GATEWAY_URL, "http://localhost:9000"),
            (ENV_STATE_SECRET, "state"),
            (ENV_AUTH_SECRET, "auth"),
            (ENV_COUNTER_MAX_ATTEMPTS, "3"),
        ]);
        let config =
            ExecutorConfig::from_lookup("orders", |k| env.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(config.gateway_url, "http://localhost:9000");
        assert_eq!(config.state_secret, "state");
        assert_eq!(config.auth_secret.as_deref(), Some("auth"));
        assert_eq!(config.counter_retry.max_attempts, 3);
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let err = ExecutorConfig::from_lookup("orders", |k| {
            (k == ENV_COUNTER_MAX_ATTEMPTS).then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, FlowError::Config(ref m) if m.contains("many")));
    }

    #[test]
    fn test_validate_flow_name() {
        let config = ExecutorConfig::new("bad/name").with_state_secret("s");
        assert!(config.validate().is_err());
    }
}
