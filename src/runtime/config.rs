//! Invoker server configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_HOST: &str = "STRAND_HOST";
pub const ENV_PORT: &str = "STRAND_PORT";
pub const ENV_FUNCTION_URI: &str = "STRAND_FUNCTION_URI";
pub const ENV_MAX_BODY_SIZE: &str = "STRAND_MAX_BODY_SIZE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no function URI configured, set {}", ENV_FUNCTION_URI)]
    MissingFunctionUri,

    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

/// Configuration for the invoker server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Function to serve, as `[file://]<path>?handler=<name>`.
    pub function_uri: Option<String>,
    /// Whether to enable health check endpoint.
    pub enable_health: bool,
    /// Maximum size in bytes of a request body or of a single stream frame.
    pub max_body_size: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            function_uri: None,
            enable_health: true,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl InvokerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(host) = lookup(ENV_HOST) {
            config.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            config.port = parse(ENV_PORT, port)?;
        }
        if let Some(size) = lookup(ENV_MAX_BODY_SIZE) {
            config.max_body_size = parse(ENV_MAX_BODY_SIZE, size)?;
        }
        config.function_uri = lookup(ENV_FUNCTION_URI).filter(|uri| !uri.is_empty());
        Ok(config)
    }

    /// Set the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the function URI.
    pub fn function_uri(mut self, uri: impl Into<String>) -> Self {
        self.function_uri = Some(uri.into());
        self
    }

    /// Enable or disable the health endpoint.
    pub fn enable_health(mut self, enabled: bool) -> Self {
        self.enable_health = enabled;
        self
    }

    /// Set the maximum body and frame size.
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Get the configured function URI.
    pub fn require_function_uri(&self) -> Result<&str, ConfigError> {
        self.function_uri
            .as_deref()
            .ok_or(ConfigError::MissingFunctionUri)
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = InvokerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, InvokerConfig::default());
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert!(matches!(
            config.require_function_uri(),
            Err(ConfigError::MissingFunctionUri)
        ));
    }

    #[test]
    fn test_overrides() {
        let config = InvokerConfig::from_lookup(lookup(&[
            (ENV_HOST, "127.0.0.1"),
            (ENV_PORT, "9000"),
            (ENV_FUNCTION_URI, "file:///functions/lib.so?handler=Upper"),
            (ENV_MAX_BODY_SIZE, "1024"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.max_body_size, 1024);
        assert_eq!(
            config.require_function_uri().unwrap(),
            "file:///functions/lib.so?handler=Upper"
        );
    }

    #[test]
    fn test_invalid_port() {
        match InvokerConfig::from_lookup(lookup(&[(ENV_PORT, "eighty")])) {
            Err(ConfigError::InvalidValue { name, value }) => {
                assert_eq!(name, ENV_PORT);
                assert_eq!(value, "eighty");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_builder() {
        let config = InvokerConfig::new()
            .host("localhost")
            .port(0)
            .function_uri("lib.so?handler=F")
            .enable_health(false)
            .max_body_size(1);
        assert_eq!(config.bind_addr(), "localhost:0");
        assert!(!config.enable_health);
        assert_eq!(config.function_uri.as_deref(), Some("lib.so?handler=F"));
    }
}
