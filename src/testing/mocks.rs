//! Mock implementations for testing
//!
//! Provides a mock `Broker` so the supervised lifecycle can be exercised
//! without a live MQTT broker. Every call is appended to a shared log in
//! invocation order, which lets tests assert teardown symmetry.

use crate::transport::mqtt::connection::{ConnectionError, ConnectionState, PublishError};
use crate::transport::mqtt::dispatcher::MessageRoute;
use crate::transport::{Broker, ReleaseHandle};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared, ordered record of broker interactions
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Mock broker for lifecycle testing
#[derive(Default)]
pub struct MockBroker {
    pub calls: CallLog,
    pub fail_connect: bool,
    pub fail_subscribe: bool,
    state: Option<ConnectionState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker whose connect always fails after exhausting its budget
    pub fn with_failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    /// Broker that connects but rejects every subscribe
    pub fn with_failing_subscribe() -> Self {
        Self {
            fail_subscribe: true,
            ..Default::default()
        }
    }

    /// Snapshot of the call log, in invocation order
    pub async fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    /// Clone of the shared log handle, for asserting after the broker
    /// has been moved into a service
    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Broker for MockBroker {
    type Sub = MockSubscription;

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.calls.lock().await.push("connect".to_string());

        if self.fail_connect {
            return Err(ConnectionError::RetriesExhausted {
                attempts: 5,
                last_error: "mock broker unreachable".to_string(),
            });
        }

        self.state = Some(ConnectionState::Connected);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        routes: Vec<Arc<dyn MessageRoute>>,
    ) -> Result<Vec<MockSubscription>, PublishError> {
        self.calls
            .lock()
            .await
            .push(format!("subscribe:{}", routes.len()));

        if self.fail_subscribe {
            return Err(PublishError::NotConnected {
                state: ConnectionState::Disconnected("mock subscribe failure".to_string()),
            });
        }

        Ok(routes
            .iter()
            .map(|route| MockSubscription {
                filter: route.pattern().as_filter(),
                calls: Arc::clone(&self.calls),
                released: AtomicBool::new(false),
            })
            .collect())
    }

    async fn disconnect(&mut self) {
        self.calls.lock().await.push("disconnect".to_string());
        self.state = Some(ConnectionState::Disconnected("mock disconnect".to_string()));
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        self.state.clone()
    }
}

/// Mock subscription recording its release into the shared log
pub struct MockSubscription {
    filter: String,
    calls: CallLog,
    released: AtomicBool,
}

impl MockSubscription {
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseHandle for MockSubscription {
    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.calls.lock().await.push(format!("release:{}", self.filter));
    }
}
