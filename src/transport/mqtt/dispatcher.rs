//! Topic routing and handler dispatch
//!
//! An [`EventBinding`] declares {topic pattern, payload type, handling
//! function}. Converting it into a [`MessageRoute`] erases the payload
//! type and seals the failure channel: decode failures and handler
//! failures both terminate inside the route, so the event loop can treat
//! delivery as infallible.

use crate::protocol::topics::{TopicParams, TopicPattern};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Error surfaced by an application handler.
///
/// Absorbed at the route boundary; it never reaches the event loop.
#[derive(Debug, Error)]
#[error("Handler failed: {message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One broker delivery addressed to a matched route. Ephemeral.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub topic: String,
    pub params: TopicParams,
    pub payload: Bytes,
}

/// Tagged decode result. Malformed payloads are a drop, never an error.
#[derive(Debug)]
pub enum DecodeOutcome<T> {
    Decoded(T),
    Dropped(String),
}

/// Decode a UTF-8 JSON payload into the route's expected type.
pub fn decode_payload<T: DeserializeOwned>(raw: &[u8]) -> DecodeOutcome<T> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => return DecodeOutcome::Dropped(format!("payload is not UTF-8: {e}")),
    };

    match serde_json::from_str(text) {
        Ok(value) => DecodeOutcome::Decoded(value),
        Err(e) => DecodeOutcome::Dropped(format!("payload does not match expected shape: {e}")),
    }
}

/// Topic and extracted path parameters handed to a handler
#[derive(Debug, Clone)]
pub struct EventContext {
    pub topic: String,
    pub params: TopicParams,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
type HandlerFn<T> = dyn Fn(EventContext, T) -> HandlerFuture + Send + Sync;

/// Declarative binding of a topic pattern to a typed handling function
pub struct EventBinding<T> {
    pattern: TopicPattern,
    handler: Arc<HandlerFn<T>>,
}

impl<T: DeserializeOwned + Send + 'static> EventBinding<T> {
    pub fn new<F, Fut>(pattern: TopicPattern, handler: F) -> Self
    where
        F: Fn(EventContext, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            pattern,
            handler: Arc::new(move |ctx, payload| Box::pin(handler(ctx, payload))),
        }
    }

    /// Seal the binding into an infallible route.
    pub fn into_route(self) -> Arc<dyn MessageRoute> {
        Arc::new(TypedRoute {
            pattern: self.pattern,
            handler: self.handler,
        })
    }
}

/// A registered route: pattern plus type-erased, failure-safe delivery
#[async_trait]
pub trait MessageRoute: Send + Sync {
    fn pattern(&self) -> &TopicPattern;

    /// Decode and invoke the handler. Infallible by contract: decode
    /// failures are dropped with a debug log, handler failures with a
    /// warn log.
    async fn deliver(&self, message: IncomingMessage);
}

struct TypedRoute<T> {
    pattern: TopicPattern,
    handler: Arc<HandlerFn<T>>,
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> MessageRoute for TypedRoute<T> {
    fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    async fn deliver(&self, message: IncomingMessage) {
        match decode_payload::<T>(&message.payload) {
            DecodeOutcome::Decoded(payload) => {
                let ctx = EventContext {
                    topic: message.topic.clone(),
                    params: message.params,
                };
                if let Err(e) = (self.handler)(ctx, payload).await {
                    warn!(topic = %message.topic, error = %e, "Handler failed, event discarded");
                }
            }
            DecodeOutcome::Dropped(reason) => {
                debug!(topic = %message.topic, %reason, "Dropping undecodable event");
            }
        }
    }
}

/// Shared routing table, read by the event loop and mutated through
/// subscription registration/release.
pub struct TopicRouter {
    routes: RwLock<HashMap<u64, Arc<dyn MessageRoute>>>,
    next_id: AtomicU64,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn insert(&self, route: Arc<dyn MessageRoute>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.routes.write().await.insert(id, route);
        id
    }

    pub async fn remove(&self, id: u64) -> bool {
        self.routes.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }

    /// Broker-side filters for every registered route, for re-subscribing
    /// after the transport re-dials.
    pub async fn filters(&self) -> Vec<String> {
        self.routes
            .read()
            .await
            .values()
            .map(|route| route.pattern().as_filter())
            .collect()
    }

    /// Fan one broker delivery out to every matching route.
    ///
    /// Each match runs on its own detached task: a slow or failing
    /// handler cannot delay the event loop or sibling routes. The tasks
    /// are never joined; in-flight handlers at shutdown are abandoned to
    /// the runtime (best-effort delivery, not a guarantee).
    ///
    /// Returns the number of routes matched.
    pub async fn dispatch(&self, topic: &str, payload: &Bytes) -> usize {
        let matched: Vec<(Arc<dyn MessageRoute>, TopicParams)> = {
            let routes = self.routes.read().await;
            routes
                .values()
                .filter_map(|route| {
                    route
                        .pattern()
                        .matches(topic)
                        .map(|params| (Arc::clone(route), params))
                })
                .collect()
        };

        let matched_count = matched.len();
        for (route, params) in matched {
            let message = IncomingMessage {
                topic: topic.to_string(),
                params,
                payload: payload.clone(),
            };
            tokio::spawn(async move {
                route.deliver(message).await;
            });
        }

        matched_count
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn pattern(s: &str) -> TopicPattern {
        TopicPattern::parse(s).unwrap()
    }

    #[test]
    fn test_decode_payload_valid_json() {
        let outcome: DecodeOutcome<String> = decode_payload(b"\"hello\"");
        assert!(matches!(outcome, DecodeOutcome::Decoded(ref s) if s == "hello"));
    }

    #[test]
    fn test_decode_payload_invalid_utf8_is_dropped() {
        let outcome: DecodeOutcome<String> = decode_payload(&[0xff, 0xfe, 0x01]);
        assert!(matches!(outcome, DecodeOutcome::Dropped(_)));
    }

    #[test]
    fn test_decode_payload_schema_mismatch_is_dropped() {
        let outcome: DecodeOutcome<u64> = decode_payload(b"\"not a number\"");
        assert!(matches!(outcome, DecodeOutcome::Dropped(_)));
    }

    #[tokio::test]
    async fn test_route_delivers_decoded_payload_with_params() {
        let (tx, mut rx) = mpsc::channel::<(String, TopicParams, String)>(4);

        let route = EventBinding::<String>::new(pattern("realtime/:channel"), move |ctx, payload| {
            let tx = tx.clone();
            async move {
                tx.send((ctx.topic, ctx.params, payload))
                    .await
                    .map_err(|e| HandlerError::new(e.to_string()))
            }
        })
        .into_route();

        let message = IncomingMessage {
            topic: "realtime/foo".to_string(),
            params: route.pattern().matches("realtime/foo").unwrap(),
            payload: Bytes::from_static(b"\"stock updated\""),
        };
        route.deliver(message).await;

        let (topic, params, payload) = rx.recv().await.unwrap();
        assert_eq!(topic, "realtime/foo");
        assert_eq!(params.get("channel").map(String::as_str), Some("foo"));
        assert_eq!(payload, "stock updated");
    }

    #[tokio::test]
    async fn test_route_drops_undecodable_payload_without_invoking_handler() {
        let (tx, mut rx) = mpsc::channel::<String>(4);

        let route = EventBinding::<u64>::new(pattern("realtime/:channel"), move |_ctx, payload| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(payload.to_string()).await;
                Ok(())
            }
        })
        .into_route();

        let message = IncomingMessage {
            topic: "realtime/foo".to_string(),
            params: TopicParams::new(),
            payload: Bytes::from_static(b"not json at all"),
        };
        route.deliver(message).await;

        // Handler must never run for an undecodable payload
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_route_absorbs_handler_failure() {
        let route = EventBinding::<String>::new(pattern("realtime/:channel"), |_ctx, _payload| async {
            Err(HandlerError::new("boom"))
        })
        .into_route();

        let message = IncomingMessage {
            topic: "realtime/foo".to_string(),
            params: TopicParams::new(),
            payload: Bytes::from_static(b"\"x\""),
        };

        // Returns normally; the failure is logged and discarded
        route.deliver(message).await;
    }

    #[tokio::test]
    async fn test_dispatch_matches_and_counts() {
        let router = TopicRouter::new();
        let (tx, mut rx) = mpsc::channel::<String>(8);

        let tx_orders = tx.clone();
        router
            .insert(
                EventBinding::<String>::new(pattern("orders/:id/events"), move |ctx, _p| {
                    let tx = tx_orders.clone();
                    async move {
                        let _ = tx.send(ctx.topic).await;
                        Ok(())
                    }
                })
                .into_route(),
            )
            .await;

        let tx_devices = tx.clone();
        router
            .insert(
                EventBinding::<String>::new(pattern("devices/+/status"), move |ctx, _p| {
                    let tx = tx_devices.clone();
                    async move {
                        let _ = tx.send(ctx.topic).await;
                        Ok(())
                    }
                })
                .into_route(),
            )
            .await;

        let matched = router
            .dispatch("orders/42/events", &Bytes::from_static(b"\"ok\""))
            .await;
        assert_eq!(matched, 1);

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered, "orders/42/events");

        let matched = router
            .dispatch("nothing/here", &Bytes::from_static(b"\"ok\""))
            .await;
        assert_eq!(matched, 0);
    }

    #[tokio::test]
    async fn test_dispatch_continues_after_failing_handler() {
        let router = TopicRouter::new();
        let (tx, mut rx) = mpsc::channel::<u32>(8);

        router
            .insert(
                EventBinding::<String>::new(pattern("realtime/:channel"), |_ctx, _p| async {
                    Err(HandlerError::new("always fails"))
                })
                .into_route(),
            )
            .await;

        let tx_ok = tx.clone();
        router
            .insert(
                EventBinding::<String>::new(pattern("realtime/:channel"), move |_ctx, _p| {
                    let tx = tx_ok.clone();
                    async move {
                        let _ = tx.send(1).await;
                        Ok(())
                    }
                })
                .into_route(),
            )
            .await;

        // Two deliveries in a row; the healthy route sees both even though
        // its sibling fails every time.
        let payload = Bytes::from_static(b"\"x\"");
        assert_eq!(router.dispatch("realtime/a", &payload).await, 2);
        assert_eq!(router.dispatch("realtime/b", &payload).await, 2);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_dispatch_does_not_block_on_slow_handler() {
        let router = TopicRouter::new();
        let (tx, mut rx) = mpsc::channel::<&'static str>(8);

        let tx_slow = tx.clone();
        router
            .insert(
                EventBinding::<String>::new(pattern("slow"), move |_ctx, _p| {
                    let tx = tx_slow.clone();
                    async move {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        let _ = tx.send("slow").await;
                        Ok(())
                    }
                })
                .into_route(),
            )
            .await;

        let tx_fast = tx.clone();
        router
            .insert(
                EventBinding::<String>::new(pattern("fast"), move |_ctx, _p| {
                    let tx = tx_fast.clone();
                    async move {
                        let _ = tx.send("fast").await;
                        Ok(())
                    }
                })
                .into_route(),
            )
            .await;

        let payload = Bytes::from_static(b"\"x\"");
        router.dispatch("slow", &payload).await;
        router.dispatch("fast", &payload).await;

        // The fast handler completes while the slow one is still parked
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some("fast"));
    }

    #[tokio::test]
    async fn test_router_filters_and_removal() {
        let router = TopicRouter::new();

        let id = router
            .insert(
                EventBinding::<String>::new(pattern("realtime/:channel"), |_ctx, _p| async {
                    Ok(())
                })
                .into_route(),
            )
            .await;

        assert_eq!(router.filters().await, vec!["realtime/+".to_string()]);
        assert_eq!(router.len().await, 1);

        assert!(router.remove(id).await);
        assert!(!router.remove(id).await);
        assert_eq!(router.len().await, 0);
    }
}
