//! Realtime event/notification core for the warehouse platform
//!
//! A broker-backed publish/subscribe bridge connecting backend domain
//! events (order updates, device status, chat messages) to long-lived
//! client connections and device/printer integrations.
//!
//! # Overview
//!
//! - MQTT broker client with a bounded-retry connect phase
//! - Topic routing with wildcard and named-parameter patterns
//! - Typed, failure-safe event handlers dispatched on detached tasks
//! - Idempotent subscription release and a symmetric teardown lifecycle
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use relay_core::config::BrokerSection;
//! use relay_core::protocol::TopicPattern;
//! use relay_core::realtime::RealtimeService;
//! use relay_core::transport::mqtt::{BrokerClient, EventBinding};
//!
//! # async fn run() -> Result<(), relay_core::error::RelayError> {
//! let broker = BrokerClient::new(BrokerSection {
//!     url: "mqtt://localhost:1883".to_string(),
//!     client_id: "warehouse-relay".to_string(),
//!     username_env: None,
//!     password_env: None,
//!     keep_alive_secs: 60,
//! });
//!
//! let mut service = RealtimeService::new(broker);
//! service.register(
//!     EventBinding::<String>::new(
//!         TopicPattern::parse("realtime/:channel").unwrap(),
//!         |ctx, payload| async move {
//!             println!("{}: {payload}", ctx.topic);
//!             Ok(())
//!         },
//!     )
//!     .into_route(),
//! );
//!
//! // Runs until the shutdown future resolves, then releases every
//! // subscription and closes the connection.
//! service.run(async { /* await a shutdown signal */ }).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod realtime;
pub mod testing;
pub mod transport;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use protocol::{TopicParams, TopicPattern};
pub use realtime::RealtimeService;
pub use transport::mqtt::{BrokerClient, EventBinding, Publisher, RetryPolicy};
