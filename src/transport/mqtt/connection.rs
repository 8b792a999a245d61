//! Pure connection-layer types for the MQTT broker client
//!
//! Endpoint validation, the bounded connect retry schedule and the
//! connection state model live here, separated from the I/O in
//! [`super::client`] so they are testable without a broker.

use crate::config::BrokerSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Upper bound on a single handshake attempt, independent of the retry
/// schedule between attempts.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection state for the broker client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - handshake in progress
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
}

impl ConnectionState {
    /// Publish and subscribe requests are only accepted when connected
    pub fn allows_traffic(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Connection-phase errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),
    #[error("Broker URL is missing an explicit port: {0}")]
    MissingPort(String),
    #[error("Broker rejected the connection: {0}")]
    Rejected(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Connect retries exhausted after {attempts} attempts, last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl ConnectionError {
    /// Endpoint errors are configuration mistakes and must not be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectionError::InvalidUrl(_) | ConnectionError::MissingPort(_)
        )
    }
}

/// Publish-path errors. Recoverable by the caller; never fatal to the
/// running relay.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not connected to broker - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Transport rejected the operation")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Validated broker endpoint, parsed once per run
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Parse and validate the configured broker URL.
    ///
    /// An absent port is a configuration mistake, reported immediately
    /// and never retried.
    pub fn from_config(config: &BrokerSection) -> Result<Self, ConnectionError> {
        let url = Url::parse(&config.url)
            .map_err(|_| ConnectionError::InvalidUrl(config.url.clone()))?;

        let host = url
            .host_str()
            .ok_or_else(|| ConnectionError::InvalidUrl(config.url.clone()))?
            .to_string();

        let port = url
            .port()
            .ok_or_else(|| ConnectionError::MissingPort(config.url.clone()))?;

        Ok(Self {
            host,
            port,
            client_id: config.client_id.clone(),
            tls: url.scheme() == "mqtts",
        })
    }
}

/// Bounded exponential backoff applied to the initial connect phase only
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Multiplicative growth per subsequent failure
    pub growth_factor: f64,
    /// Total handshake attempts before giving up
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            growth_factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `failed_attempt` (1-based) has failed, or
    /// `None` when the budget is exhausted and the caller must stop.
    pub fn next_delay(&self, failed_attempt: u32) -> Option<Duration> {
        if failed_attempt >= self.max_attempts {
            return None;
        }

        let exponent = failed_attempt.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.growth_factor.powi(exponent);
        Some(Duration::from_millis(millis as u64))
    }
}

/// Assemble MQTT options from a validated endpoint.
///
/// Credentials are resolved from the environment here, at connect time.
pub fn configure_mqtt_options(endpoint: &BrokerEndpoint, config: &BrokerSection) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(
        endpoint.client_id.as_str(),
        endpoint.host.as_str(),
        endpoint.port,
    );

    if endpoint.tls {
        let transport = RumqttcTransport::tls_with_default_config();
        mqtt_options.set_transport(transport);
    }

    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    mqtt_options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_section(url: &str) -> BrokerSection {
        BrokerSection {
            url: url.to_string(),
            client_id: "relay-test".to_string(),
            username_env: None,
            password_env: None,
            keep_alive_secs: 60,
        }
    }

    #[test]
    fn test_endpoint_with_explicit_port() {
        let endpoint = BrokerEndpoint::from_config(&broker_section("mqtt://localhost:1883")).unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 1883);
        assert!(!endpoint.tls);
    }

    #[test]
    fn test_endpoint_missing_port_is_rejected() {
        let result = BrokerEndpoint::from_config(&broker_section("mqtt://localhost"));
        assert!(matches!(result, Err(ConnectionError::MissingPort(_))));
    }

    #[test]
    fn test_endpoint_invalid_url_is_rejected() {
        let result = BrokerEndpoint::from_config(&broker_section("not a url"));
        assert!(matches!(result, Err(ConnectionError::InvalidUrl(_))));
    }

    #[test]
    fn test_endpoint_tls_scheme() {
        let endpoint =
            BrokerEndpoint::from_config(&broker_section("mqtts://broker.internal:8883")).unwrap();
        assert!(endpoint.tls);
        assert_eq!(endpoint.port, 8883);
    }

    #[test]
    fn test_endpoint_errors_are_not_retryable() {
        let missing = BrokerEndpoint::from_config(&broker_section("mqtt://localhost")).unwrap_err();
        assert!(!missing.is_retryable());

        let invalid = BrokerEndpoint::from_config(&broker_section("::::")).unwrap_err();
        assert!(!invalid.is_retryable());

        let rejected = ConnectionError::Rejected("bad credentials".to_string());
        assert!(rejected.is_retryable());
    }

    #[test]
    fn test_retry_schedule_doubles_from_one_second() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_secs(8)));
    }

    #[test]
    fn test_retry_schedule_stops_after_max_attempts() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.next_delay(5), None);
        assert_eq!(policy.next_delay(6), None);
    }

    #[test]
    fn test_retry_delays_are_non_decreasing() {
        let policy = RetryPolicy::default();

        let mut previous = Duration::ZERO;
        for attempt in 1..policy.max_attempts {
            let delay = policy.next_delay(attempt).unwrap();
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn test_connection_state_traffic_gate() {
        assert!(ConnectionState::Connected.allows_traffic());
        assert!(!ConnectionState::Connecting.allows_traffic());
        assert!(!ConnectionState::Disconnected("gone".to_string()).allows_traffic());
    }

    #[test]
    fn test_configure_mqtt_options_builds_for_both_schemes() {
        for url in ["mqtt://broker.internal:1884", "mqtts://broker.internal:8883"] {
            let config = broker_section(url);
            let endpoint = BrokerEndpoint::from_config(&config).unwrap();
            let _options = configure_mqtt_options(&endpoint, &config);
        }
    }
}
