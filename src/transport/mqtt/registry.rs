//! Subscription tracking and release
//!
//! Every registered route yields a [`Subscription`] whose release is
//! idempotent. The [`SubscriptionRegistry`] owns them until shutdown and
//! releases the whole batch fire-and-continue.

use super::dispatcher::TopicRouter;
use crate::transport::ReleaseHandle;
use rumqttc::v5::AsyncClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runtime result of registering a route with the live connection
pub struct Subscription {
    route_id: u64,
    filter: String,
    client: AsyncClient,
    router: Arc<TopicRouter>,
    released: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        route_id: u64,
        filter: String,
        client: AsyncClient,
        router: Arc<TopicRouter>,
    ) -> Self {
        Self {
            route_id,
            filter,
            client,
            router,
            released: AtomicBool::new(false),
        }
    }

    /// Broker-side filter this subscription covers
    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ReleaseHandle for Subscription {
    async fn release(&self) {
        // First caller wins; every later call is a no-op
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        self.router.remove(self.route_id).await;

        if let Err(e) = self.client.unsubscribe(self.filter.clone()).await {
            warn!(filter = %self.filter, error = %e, "Unsubscribe failed during release");
        } else {
            debug!(filter = %self.filter, "Subscription released");
        }
    }
}

/// Owns the active subscriptions for one orchestrated run
pub struct SubscriptionRegistry<S: ReleaseHandle> {
    subscriptions: Vec<S>,
}

impl<S: ReleaseHandle> SubscriptionRegistry<S> {
    pub fn new(subscriptions: Vec<S>) -> Self {
        Self { subscriptions }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Release every subscription. Order among siblings is unspecified
    /// and each release is attempted even if another already failed.
    pub async fn release_all(&self) {
        for subscription in &self.subscriptions {
            subscription.release().await;
        }
    }
}
