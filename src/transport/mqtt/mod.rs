//! MQTT broker client for the realtime relay
//!
//! The module separates pure decision logic from I/O:
//!
//! - [`connection`] - endpoint validation, retry schedule, connection state
//! - [`dispatcher`] - topic routing table and handler dispatch
//! - [`registry`] - subscription tracking and idempotent release
//! - [`client`] - the connection manager and publish path

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod registry;

// Re-export public types for convenience
pub use client::{BrokerClient, Publisher};
pub use connection::{
    BrokerEndpoint, ConnectionError, ConnectionState, PublishError, RetryPolicy,
};
pub use dispatcher::{
    decode_payload, DecodeOutcome, EventBinding, EventContext, HandlerError, IncomingMessage,
    MessageRoute, TopicRouter,
};
pub use registry::{Subscription, SubscriptionRegistry};
