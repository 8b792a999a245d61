//! Session fan-out seam
//!
//! Live client connections (WebSockets) are owned elsewhere; the relay
//! only addresses them through [`SessionFanout`]. Handlers forward
//! decoded events here and the hosting process decides what a session
//! key maps to.

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Event addressed to the live sockets of one session key
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_key: String,
    pub payload: String,
}

/// Delivery interface to live client connections. Consumed, not owned,
/// by the relay core.
#[async_trait]
pub trait SessionFanout: Send + Sync {
    /// Deliver a serialized event to every live socket of `session_key`.
    /// Best-effort: a session with no live sockets is not an error.
    async fn deliver(&self, session_key: &str, payload: &str);
}

/// Broadcast-channel adapter used by the daemon: socket tasks subscribe
/// and filter on their own session key.
pub struct BroadcastFanout {
    tx: broadcast::Sender<SessionEvent>,
}

impl BroadcastFanout {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl SessionFanout for BroadcastFanout {
    async fn deliver(&self, session_key: &str, payload: &str) {
        // send only errors when there are no receivers; that is fine
        let _ = self.tx.send(SessionEvent {
            session_key: session_key.to_string(),
            payload: payload.to_string(),
        });
    }
}
