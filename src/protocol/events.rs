//! Domain event payloads carried over the realtime layer
//!
//! These are the JSON envelopes the warehouse backend publishes and the
//! relay routes to handlers. The relay itself never interprets them
//! beyond decoding; they are typed here so handlers receive structured
//! values instead of raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::topics::canonicalize_topic;

/// Lifecycle states of a warehouse order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Picking,
    Packed,
    Shipped,
    Cancelled,
}

/// Order state change, published whenever an order transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub organization_id: Uuid,
    pub status: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Device heartbeat/status report from scanners and label printers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusEvent {
    pub device_id: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<u8>,
    pub reported_at: DateTime<Utc>,
}

/// Chat message between warehouse staff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub sender_id: Uuid,
    pub room: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Topic construction for the relay's well-known routes
pub struct TopicBuilder;

impl TopicBuilder {
    /// Realtime channel topic: `realtime/{channel}`
    pub fn realtime_topic(channel: &str) -> String {
        canonicalize_topic(&format!("realtime/{channel}"))
    }

    /// Order event topic: `orders/{order_id}/events`
    pub fn order_events_topic(order_id: &Uuid) -> String {
        canonicalize_topic(&format!("orders/{order_id}/events"))
    }

    /// Device status topic: `devices/{device_id}/status`
    pub fn device_status_topic(device_id: &str) -> String {
        canonicalize_topic(&format!("devices/{device_id}/status"))
    }

    /// Chat room topic: `chat/{room}/messages`
    pub fn chat_topic(room: &str) -> String {
        canonicalize_topic(&format!("chat/{room}/messages"))
    }
}
