//! Supervised lifecycle for the realtime relay
//!
//! The service composes the broker client, the registered routes and the
//! subscription registry into one orchestrated run:
//!
//! connect -> subscribe-all -> run until cancelled -> release-all -> disconnect
//!
//! Teardown is symmetric with acquisition: the connection is acquired
//! first and released last, with every subscription released in between
//! regardless of why the run ended.

use crate::error::RelayResult;
use crate::transport::mqtt::dispatcher::MessageRoute;
use crate::transport::mqtt::registry::SubscriptionRegistry;
use crate::transport::Broker;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Orchestrates one supervised run of the realtime relay
pub struct RealtimeService<B: Broker> {
    broker: B,
    routes: Vec<Arc<dyn MessageRoute>>,
}

impl<B: Broker> RealtimeService<B> {
    /// Create a service over an injected (not yet connected) broker
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            routes: Vec::new(),
        }
    }

    /// Register a route before the run starts. Routes are immutable once
    /// the service is running.
    pub fn register(&mut self, route: Arc<dyn MessageRoute>) {
        self.routes.push(route);
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Borrow the underlying broker (e.g. for a publish handle)
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Run until the shutdown future resolves.
    ///
    /// A connect failure aborts the run with nothing acquired. Once the
    /// connection exists it is always closed before returning, even when
    /// subscribing fails. During normal operation the service parks on
    /// `shutdown`; when it resolves, all subscription release actions run
    /// (fire-and-continue, order unspecified) and the connection is
    /// closed last.
    pub async fn run<F>(mut self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.broker.connect().await?;

        let routes = std::mem::take(&mut self.routes);
        let route_count = routes.len();

        let registry = match self.broker.subscribe(routes).await {
            Ok(subscriptions) => SubscriptionRegistry::new(subscriptions),
            Err(e) => {
                // The connection was acquired; close it before aborting
                self.broker.disconnect().await;
                return Err(e.into());
            }
        };

        info!(routes = route_count, "Realtime relay running");

        shutdown.await;

        info!("Shutdown requested, tearing down realtime relay");
        registry.release_all().await;
        self.broker.disconnect().await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::topics::TopicPattern;
    use crate::testing::mocks::MockBroker;
    use crate::transport::mqtt::dispatcher::EventBinding;

    fn route(pattern: &str) -> Arc<dyn MessageRoute> {
        EventBinding::<String>::new(TopicPattern::parse(pattern).unwrap(), |_ctx, _payload| async {
            Ok(())
        })
        .into_route()
    }

    #[tokio::test]
    async fn test_register_accumulates_routes() {
        let mut service = RealtimeService::new(MockBroker::new());
        assert_eq!(service.route_count(), 0);

        service.register(route("realtime/:channel"));
        service.register(route("devices/+/status"));
        assert_eq!(service.route_count(), 2);
    }
}
