//! Transport layer for the realtime relay
//!
//! Provides the broker abstraction and its MQTT implementation. The
//! [`Broker`] trait exists so the supervised lifecycle can be driven
//! against a mock in tests.

use crate::transport::mqtt::connection::{ConnectionError, ConnectionState, PublishError};
use crate::transport::mqtt::dispatcher::MessageRoute;
use std::sync::Arc;

pub mod mqtt;

/// An acquired subscription's release action.
///
/// `release` is idempotent: invoking it twice produces the same end
/// state as invoking it once. It absorbs its own failures, so batch
/// teardown is fire-and-continue.
#[async_trait::async_trait]
pub trait ReleaseHandle: Send + Sync {
    async fn release(&self);
}

/// Broker connection lifecycle as consumed by the orchestrator.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    type Sub: ReleaseHandle + Send + Sync + 'static;

    /// Establish the connection. Applies the configured retry policy to
    /// the handshake; endpoint validation errors surface immediately.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Register routes with the live connection, returning one release
    /// handle per route.
    async fn subscribe(
        &mut self,
        routes: Vec<Arc<dyn MessageRoute>>,
    ) -> Result<Vec<Self::Sub>, PublishError>;

    /// Close the transport. Safe to call when no connection is present.
    async fn disconnect(&mut self);

    /// Current connection state, `None` before the first connect attempt.
    fn connection_state(&self) -> Option<ConnectionState>;
}

/// Type alias for the production MQTT broker client
pub type MqttBroker = mqtt::client::BrokerClient;
