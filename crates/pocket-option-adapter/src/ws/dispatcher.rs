/*
[INPUT]:  ClientEvents from the session reader and keep-alive tasks
[OUTPUT]: In-order fan-out to registered callbacks and async subscribers
[POS]:    WebSocket layer - event registry
[UPDATE]: When subscriber shapes or isolation rules change
*/

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::message::{ClientEvent, EventKind};

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;
pub type CallbackResult = std::result::Result<(), CallbackError>;

/// Synchronous user callback.
pub type EventCallback = Arc<dyn Fn(&ClientEvent) -> CallbackResult + Send + Sync>;

/// Asynchronous subscriber, used by internal components.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn on_event(&self, event: &ClientEvent) -> CallbackResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Subscriber {
    Callback(EventCallback),
    Async(Arc<dyn EventSubscriber>),
}

/// Registry of event kind -> ordered subscribers.
pub struct EventDispatcher {
    next_id: AtomicU64,
    registry: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Subscriber)>>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_callback(&self, kind: EventKind, callback: EventCallback) -> SubscriptionId {
        self.register(kind, Subscriber::Callback(callback)).await
    }

    pub async fn add_subscriber(
        &self,
        kind: EventKind,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> SubscriptionId {
        self.register(kind, Subscriber::Async(subscriber)).await
    }

    /// Returns false if the id was not registered for `kind`.
    pub async fn remove(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write().await;
        let Some(subscribers) = registry.get_mut(&kind) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        before != subscribers.len()
    }

    pub async fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry
            .read()
            .await
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver `event` to every subscriber of its kind, in registration order.
    /// A failing or panicking subscriber is logged and skipped.
    pub async fn emit(&self, event: &ClientEvent) {
        let kind = event.kind();
        let subscribers: Vec<(SubscriptionId, Subscriber)> = {
            let registry = self.registry.read().await;
            match registry.get(&kind) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        debug!(event = %kind, subscribers = subscribers.len(), "dispatching event");

        for (id, subscriber) in subscribers {
            let outcome = match subscriber {
                Subscriber::Callback(callback) => {
                    std::panic::catch_unwind(AssertUnwindSafe(|| callback(event)))
                }
                Subscriber::Async(subscriber) => {
                    AssertUnwindSafe(subscriber.on_event(event))
                        .catch_unwind()
                        .await
                }
            };

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(event = %kind, subscription = id.0, error = %err, "event subscriber failed");
                }
                Err(_) => {
                    warn!(event = %kind, subscription = id.0, "event subscriber panicked");
                }
            }
        }
    }

    async fn register(&self, kind: EventKind, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .write()
            .await
            .entry(kind)
            .or_default()
            .push((id, subscriber));
        id
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> EventCallback {
        Arc::new(move |event: &ClientEvent| -> CallbackResult {
            log.lock().unwrap().push(format!("{tag}:{}", event.kind()));
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_emit_preserves_registration_order() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher
            .add_callback(EventKind::BalanceUpdated, recorder(log.clone(), "a"))
            .await;
        dispatcher
            .add_callback(EventKind::BalanceUpdated, recorder(log.clone(), "b"))
            .await;
        dispatcher
            .add_callback(EventKind::OrderOpened, recorder(log.clone(), "c"))
            .await;

        dispatcher
            .emit(&ClientEvent::BalanceUpdated(json!({"balance": 1})))
            .await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:balance_updated".to_string(), "b:balance_updated".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failing_and_panicking_callbacks_are_isolated() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher
            .add_callback(
                EventKind::OrderClosed,
                Arc::new(|_: &ClientEvent| -> CallbackResult { Err("boom".into()) }),
            )
            .await;
        dispatcher
            .add_callback(
                EventKind::OrderClosed,
                Arc::new(|_: &ClientEvent| -> CallbackResult { panic!("subscriber bug") }),
            )
            .await;
        dispatcher
            .add_callback(EventKind::OrderClosed, recorder(log.clone(), "last"))
            .await;

        dispatcher
            .emit(&ClientEvent::OrderClosed(json!({"deals": []})))
            .await;

        assert_eq!(*log.lock().unwrap(), vec!["last:order_closed".to_string()]);
    }

    struct Counting(Arc<Mutex<u32>>);

    #[async_trait]
    impl EventSubscriber for Counting {
        async fn on_event(&self, _event: &ClientEvent) -> CallbackResult {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_async_subscriber_and_removal() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(Mutex::new(0));
        let id = dispatcher
            .add_subscriber(EventKind::Authenticated, Arc::new(Counting(count.clone())))
            .await;

        dispatcher.emit(&ClientEvent::Authenticated(json!({}))).await;
        assert_eq!(*count.lock().unwrap(), 1);

        assert!(dispatcher.remove(EventKind::Authenticated, id).await);
        assert!(!dispatcher.remove(EventKind::Authenticated, id).await);
        assert_eq!(dispatcher.subscriber_count(EventKind::Authenticated).await, 0);

        dispatcher.emit(&ClientEvent::Authenticated(json!({}))).await;
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
