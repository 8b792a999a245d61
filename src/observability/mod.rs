//! Observability infrastructure for the relay

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
