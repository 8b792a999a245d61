//! Configuration for the realtime relay daemon
//!
//! The relay reads a single TOML file at startup. Credentials are never
//! stored inline: the config names environment variables and the values
//! are resolved at connect time.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub realtime: RealtimeSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with scheme, host and an explicit port (e.g. `mqtt://localhost:1883`)
    pub url: String,
    /// Client identifier presented to the broker (must match [a-zA-Z0-9._-]+)
    pub client_id: String,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    /// Keep-alive interval negotiated with the broker, in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_keep_alive() -> u64 {
    60
}

/// Realtime layer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeSection {
    /// Capacity of the per-process session fan-out channel
    #[serde(default = "default_fanout_capacity")]
    pub fanout_capacity: usize,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            fanout_capacity: default_fanout_capacity(),
        }
    }
}

fn default_fanout_capacity() -> usize {
    256
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// Client-id format is validated here; broker URL validation happens
    /// at connect time so the connection layer can report it precisely.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;

        validate_client_id(&config.broker.client_id)?;

        Ok(config)
    }

    /// Get the broker username from its environment variable
    pub fn broker_username(&self) -> Option<String> {
        get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get the broker password from its environment variable
    pub fn broker_password(&self) -> Option<String> {
        get_env_var_optional(self.broker.password_env.as_ref())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
url = "mqtt://localhost:1883"
client_id = "relay-test"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Validate client ID format
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
