//! Impure I/O operations for the MQTT broker client
//!
//! Owns the single live broker connection: bounded-retry connect, the
//! event-loop driver task, subscription registration and the publish
//! path. Pure decision logic lives in [`super::connection`].

use super::connection::{
    configure_mqtt_options, BrokerEndpoint, ConnectionError, ConnectionState, PublishError,
    RetryPolicy, HANDSHAKE_TIMEOUT,
};
use super::dispatcher::{MessageRoute, TopicRouter};
use super::registry::Subscription;
use crate::config::BrokerSection;
use crate::transport::Broker;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, PublishProperties};
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, Event, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Broker client owning at most one live connection.
///
/// A connect attempt always builds a fresh client/event-loop pair; a new
/// attempt replaces, never coexists with, a prior handle.
pub struct BrokerClient {
    config: BrokerSection,
    retry_policy: RetryPolicy,
    router: Arc<TopicRouter>,
    client: Option<AsyncClient>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    driver_handle: Option<JoinHandle<()>>,
}

impl BrokerClient {
    pub fn new(config: BrokerSection) -> Self {
        Self::with_retry_policy(config, RetryPolicy::default())
    }

    pub fn with_retry_policy(config: BrokerSection, retry_policy: RetryPolicy) -> Self {
        Self {
            config,
            retry_policy,
            router: Arc::new(TopicRouter::new()),
            client: None,
            state_rx: None,
            shutdown_tx: None,
            driver_handle: None,
        }
    }

    /// Current connection state, `None` before the first connect
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Cloneable publish handle bound to the live connection
    pub fn publisher(&self) -> Result<Publisher, PublishError> {
        match (&self.client, &self.state_rx) {
            (Some(client), Some(state_rx)) => Ok(Publisher {
                client: client.clone(),
                state_rx: state_rx.clone(),
            }),
            _ => Err(self.not_connected()),
        }
    }

    fn not_connected(&self) -> PublishError {
        PublishError::NotConnected {
            state: self
                .connection_state()
                .unwrap_or_else(|| ConnectionState::Disconnected("never connected".to_string())),
        }
    }

    /// Establish the connection under the bounded retry policy.
    ///
    /// An endpoint without an explicit port fails immediately, before any
    /// handshake attempt. A handshake attempt succeeds only on a positive
    /// CONNACK; any rejection, transport error or timeout consumes one
    /// attempt from the budget.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.client.is_some() {
            // One connect per orchestrated run; repeated calls are a no-op
            return Ok(());
        }

        let endpoint = BrokerEndpoint::from_config(&self.config)?;

        let mut attempt = 1u32;
        loop {
            info!(
                attempt,
                max_attempts = self.retry_policy.max_attempts,
                host = %endpoint.host,
                port = endpoint.port,
                "Connecting to broker"
            );

            match Self::attempt_handshake(&endpoint, &self.config).await {
                Ok((client, event_loop)) => {
                    let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
                    let (shutdown_tx, shutdown_rx) = watch::channel(false);

                    let driver = tokio::spawn(Self::drive(
                        event_loop,
                        client.clone(),
                        Arc::clone(&self.router),
                        state_tx,
                        shutdown_rx,
                    ));

                    self.client = Some(client);
                    self.state_rx = Some(state_rx);
                    self.shutdown_tx = Some(shutdown_tx);
                    self.driver_handle = Some(driver);

                    info!(client_id = %endpoint.client_id, "Broker connection established");
                    return Ok(());
                }
                Err(error) => match self.retry_policy.next_delay(attempt) {
                    Some(delay) => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            %error,
                            "Handshake failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        return Err(ConnectionError::RetriesExhausted {
                            attempts: attempt,
                            last_error: error.to_string(),
                        });
                    }
                },
            }
        }
    }

    /// One handshake attempt against a fresh client/event-loop pair.
    /// Success requires the broker's CONNACK with a success code.
    async fn attempt_handshake(
        endpoint: &BrokerEndpoint,
        config: &BrokerSection,
    ) -> Result<(AsyncClient, EventLoop), ConnectionError> {
        let options = configure_mqtt_options(endpoint, config);
        let (client, mut event_loop) = AsyncClient::new(options, 16);

        let outcome =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, Self::wait_for_connack(&mut event_loop)).await;

        match outcome {
            Ok(Ok(())) => Ok((client, event_loop)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::Handshake(
                "no CONNACK before timeout".to_string(),
            )),
        }
    }

    /// Poll until the broker answers the connect request
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), ConnectionError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(packet)) => {
                    if let Packet::ConnAck(ack) = packet {
                        if matches!(ack.code, ConnectReturnCode::Success) {
                            return Ok(());
                        }
                        return Err(ConnectionError::Rejected(format!("{:?}", ack.code)));
                    }
                }
                Ok(Event::Outgoing(_)) => continue,
                Err(e) => return Err(ConnectionError::Handshake(e.to_string())),
            }
        }
    }

    /// Event-loop driver: routes inbound publishes, tracks connection
    /// state and re-subscribes registered filters when the transport
    /// re-dials after a drop. Runs until the shutdown signal.
    async fn drive(
        mut event_loop: EventLoop,
        client: AsyncClient,
        router: Arc<TopicRouter>,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping broker event loop");
                        break;
                    }
                }

                event = event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(packet)) => {
                            Self::handle_incoming(packet, &client, &router, &state_tx).await;
                        }
                        Ok(Event::Outgoing(_)) => {}
                        Err(e) => {
                            warn!(error = %e, "Broker event loop error");
                            let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));

                            // The client re-dials on the next poll; pace it
                            if !Self::interruptible_sleep(&mut shutdown_rx, Duration::from_secs(1)).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        let _ = state_tx.send(ConnectionState::Disconnected("shutdown".to_string()));
        info!("Broker event loop stopped");
    }

    async fn handle_incoming(
        packet: Packet,
        client: &AsyncClient,
        router: &Arc<TopicRouter>,
        state_tx: &watch::Sender<ConnectionState>,
    ) {
        match packet {
            Packet::Publish(publish) => {
                let topic = String::from_utf8_lossy(&publish.topic).to_string();
                let matched = router.dispatch(&topic, &publish.payload).await;
                debug!(topic = %topic, matched, "Dispatched inbound message");
            }
            Packet::ConnAck(ack) => {
                // Seen mid-run only when the transport re-dialed
                if matches!(ack.code, ConnectReturnCode::Success) {
                    let _ = state_tx.send(ConnectionState::Connected);
                    Self::resubscribe(client, router).await;
                } else {
                    let _ = state_tx.send(ConnectionState::Disconnected(format!(
                        "reconnect rejected: {:?}",
                        ack.code
                    )));
                }
            }
            Packet::Disconnect(_) => {
                let _ = state_tx.send(ConnectionState::Disconnected(
                    "Broker disconnected".to_string(),
                ));
            }
            Packet::SubAck(suback) => {
                debug!(packet_id = suback.pkid, "Subscription confirmed");
            }
            other => {
                debug!(packet = ?other, "Broker event");
            }
        }
    }

    /// Restore every registered filter after an in-place reconnect
    async fn resubscribe(client: &AsyncClient, router: &Arc<TopicRouter>) {
        for filter in router.filters().await {
            if let Err(e) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
                warn!(filter = %filter, error = %e, "Re-subscribe failed");
            } else {
                debug!(filter = %filter, "Re-subscribed");
            }
        }
    }

    /// Sleep that aborts early on the shutdown signal.
    /// Returns false when shutdown was requested.
    async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Register routes with the live connection. Each route subscribes
    /// its broker-side filter and is inserted into the routing table;
    /// the returned subscriptions carry the idempotent release actions.
    pub async fn subscribe(
        &mut self,
        routes: Vec<Arc<dyn MessageRoute>>,
    ) -> Result<Vec<Subscription>, PublishError> {
        let state = self.connection_state();
        let client = match (&self.client, &state) {
            (Some(client), Some(s)) if s.allows_traffic() => client,
            _ => return Err(self.not_connected()),
        };

        let mut subscriptions = Vec::with_capacity(routes.len());
        for route in routes {
            let filter = route.pattern().as_filter();

            client
                .subscribe(filter.clone(), QoS::AtLeastOnce)
                .await
                .map_err(|e| PublishError::Transport(Box::new(e)))?;

            let route_id = self.router.insert(route).await;
            subscriptions.push(Subscription::new(
                route_id,
                filter.clone(),
                client.clone(),
                Arc::clone(&self.router),
            ));

            info!(filter = %filter, "Subscribed");
        }

        Ok(subscriptions)
    }

    /// Publish an already-serialized message at QoS 1.
    pub async fn publish(&self, topic: &str, message: &str) -> Result<(), PublishError> {
        match self.publisher() {
            Ok(publisher) => publisher.publish(topic, message).await,
            Err(e) => Err(e),
        }
    }

    /// Close the transport and stop the driver task. Safe to call when
    /// no connection was ever established.
    pub async fn disconnect(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "Disconnect request not delivered");
            }
        }

        if let Some(handle) = self.driver_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("Broker event loop shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "Broker event loop ended with error")
                }
                Err(_) => {
                    warn!("Broker event loop didn't stop in time, forcing abort");
                    // Dropping the JoinHandle after timeout leaves the task
                    // to the runtime; the shutdown signal already fired.
                }
                _ => {}
            }
        }

        self.shutdown_tx = None;
        info!("Broker client disconnected");
    }
}

#[async_trait::async_trait]
impl Broker for BrokerClient {
    type Sub = Subscription;

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        BrokerClient::connect(self).await
    }

    async fn subscribe(
        &mut self,
        routes: Vec<Arc<dyn MessageRoute>>,
    ) -> Result<Vec<Subscription>, PublishError> {
        BrokerClient::subscribe(self, routes).await
    }

    async fn disconnect(&mut self) {
        BrokerClient::disconnect(self).await
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        BrokerClient::connection_state(self)
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        // Stop the driver if disconnect() was never called; async cleanup
        // is not possible here.
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.driver_handle.take() {
            handle.abort();
        }
    }
}

/// Cloneable publish handle over the live connection.
///
/// Reads shared connection state; never initiates a connection itself.
#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Publisher {
    /// Publish an already-serialized message at QoS 1 (at-least-once
    /// hand-off to the transport).
    pub async fn publish(&self, topic: &str, message: &str) -> Result<(), PublishError> {
        let state = self.state_rx.borrow().clone();
        if !state.allows_traffic() {
            return Err(PublishError::NotConnected { state });
        }

        self.client
            .publish_with_properties(
                topic,
                QoS::AtLeastOnce,
                false,
                message.to_string(),
                PublishProperties::default(),
            )
            .await
            .map_err(|e| PublishError::Transport(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::topics::TopicPattern;
    use crate::transport::mqtt::dispatcher::EventBinding;

    fn test_broker_section(url: &str) -> BrokerSection {
        BrokerSection {
            url: url.to_string(),
            client_id: "relay-test".to_string(),
            username_env: None,
            password_env: None,
            keep_alive_secs: 60,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            growth_factor: 2.0,
            max_attempts: 3,
        }
    }

    fn noop_route() -> Arc<dyn MessageRoute> {
        EventBinding::<String>::new(
            TopicPattern::parse("realtime/:channel").unwrap(),
            |_ctx, _payload| async { Ok(()) },
        )
        .into_route()
    }

    #[tokio::test]
    async fn test_state_is_none_before_connect() {
        let client = BrokerClient::new(test_broker_section("mqtt://localhost:1883"));
        assert!(client.connection_state().is_none());
    }

    #[tokio::test]
    async fn test_publish_without_connection_fails_with_publish_error() {
        let client = BrokerClient::new(test_broker_section("mqtt://localhost:1883"));

        let result = client.publish("realtime/foo", "\"hello\"").await;
        assert!(matches!(result, Err(PublishError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_publisher_handle_unavailable_without_connection() {
        let client = BrokerClient::new(test_broker_section("mqtt://localhost:1883"));
        assert!(matches!(
            client.publisher(),
            Err(PublishError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_subscribe_without_connection_fails() {
        let mut client = BrokerClient::new(test_broker_section("mqtt://localhost:1883"));

        let result = client.subscribe(vec![noop_route()]).await;
        assert!(matches!(result, Err(PublishError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_safe() {
        let mut client = BrokerClient::new(test_broker_section("mqtt://localhost:1883"));
        client.disconnect().await;
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_missing_port_fails_immediately() {
        let mut client = BrokerClient::new(test_broker_section("mqtt://localhost"));

        let result = client.connect().await;
        // Endpoint validation short-circuits: no handshake, no retries
        assert!(matches!(result, Err(ConnectionError::MissingPort(_))));
        assert!(client.connection_state().is_none());
    }

    #[tokio::test]
    async fn test_connect_invalid_url_fails_immediately() {
        let mut client = BrokerClient::new(test_broker_section("definitely not a url"));

        let result = client.connect().await;
        assert!(matches!(result, Err(ConnectionError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_exhausts_retries_against_unreachable_broker() {
        // Port 1 refuses connections; every attempt burns one retry
        let mut client = BrokerClient::with_retry_policy(
            test_broker_section("mqtt://127.0.0.1:1"),
            fast_retry(),
        );

        let result = client.connect().await;
        match result {
            Err(ConnectionError::RetriesExhausted { attempts, .. }) => {
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }

        // Nothing was acquired
        assert!(client.connection_state().is_none());
        let publish = client.publish("realtime/foo", "\"x\"").await;
        assert!(matches!(publish, Err(PublishError::NotConnected { .. })));
    }
}
