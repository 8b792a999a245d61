//! Crate-level error type for the realtime relay
//!
//! Only configuration and connection errors may terminate an orchestrated
//! run; everything downstream of a successful connection degrades to a
//! silent drop or a caller-visible publish error.

use crate::config::ConfigError;
use crate::transport::mqtt::connection::{ConnectionError, PublishError};
use thiserror::Error;

/// Top-level error for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
