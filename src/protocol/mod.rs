//! Message types and topic handling for the realtime relay

pub mod events;
pub mod topics;

pub use events::{ChatMessageEvent, DeviceStatusEvent, OrderEvent, OrderStatus, TopicBuilder};
pub use topics::{canonicalize_topic, PatternError, TopicParams, TopicPattern};
