//! Named-event bus with bounded history, filters, and async handler isolation.
//!
//! Delivery order within one `publish` call: history append, filter check,
//! synchronous listeners (name-specific then wildcard), then asynchronous
//! handlers awaited sequentially. Handler failures are logged and re-published
//! as a dedicated error event; they never propagate to the publisher.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::error;

use learn_core::ids::new_id;

use super::names;

/// Subscribing under this name receives every published event.
pub const WILDCARD: &str = "*";

const HISTORY_LIMIT: usize = 1000;

/// Errors surfaced by event-bus wait primitives.
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("timed out after {timeout_ms}ms waiting for event `{event}`")]
    WaitTimeout { event: String, timeout_ms: u64 },

    #[error("wait channel for event `{event}` dropped before delivery")]
    WaitChannelDropped { event: String },
}

/// A published event as recorded in history and delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: String,
    pub name: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Asynchronous event handler, invoked sequentially after sync delivery.
#[async_trait]
pub trait AsyncEventHandler: Send + Sync {
    async fn handle(&self, event: &EventRecord) -> Result<(), HandlerError>;
}

/// Handle for removing a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Aggregate counts per event name, derived from history.
#[derive(Debug, Clone)]
pub struct EventStats {
    pub count: usize,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
}

type Listener = Arc<dyn Fn(&EventRecord) + Send + Sync>;
type Filter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<String, Vec<Subscriber>>,
    filters: HashMap<String, Vec<Filter>>,
    async_handlers: HashMap<String, Vec<Arc<dyn AsyncEventHandler>>>,
    history: VecDeque<EventRecord>,
}

impl Registry {
    fn record(&mut self, record: &EventRecord) {
        self.history.push_back(record.clone());
        if self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }

    fn suppressed(&self, record: &EventRecord) -> bool {
        self.filters
            .get(&record.name)
            .is_some_and(|filters| filters.iter().any(|f| f(&record.payload)))
    }

    /// Collects name-specific then wildcard listeners, dropping one-shot
    /// subscribers on the way out.
    fn take_listeners(&mut self, name: &str) -> Vec<Listener> {
        let mut out = Vec::new();
        for key in [name, WILDCARD] {
            if let Some(subs) = self.listeners.get_mut(key) {
                out.extend(subs.iter().map(|s| Arc::clone(&s.listener)));
                subs.retain(|s| !s.once);
            }
        }
        out
    }
}

/// In-process publish/subscribe channel shared by all runtime components.
///
/// The registry and history buffer are internally synchronized; clones share
/// the same underlying state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry::default())),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().expect("event bus lock poisoned")
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns `false` if a filter suppressed delivery (the event is still
    /// recorded in history). Synchronous listeners complete before any async
    /// handler runs; async handlers run sequentially and their failures are
    /// swallowed and re-published under [`names::BUS_ERROR`].
    pub async fn publish(&self, name: &str, payload: Value) -> bool {
        let record = EventRecord {
            id: new_id(),
            name: name.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        let (listeners, handlers) = {
            let mut registry = self.registry();
            registry.record(&record);
            if registry.suppressed(&record) {
                return false;
            }
            let listeners = registry.take_listeners(name);
            let handlers: Vec<Arc<dyn AsyncEventHandler>> = registry
                .async_handlers
                .get(name)
                .cloned()
                .unwrap_or_default();
            (listeners, handlers)
        };

        for listener in &listeners {
            listener(&record);
        }

        for handler in &handlers {
            if let Err(err) = handler.handle(&record).await {
                error!(
                    target: "runtime::events",
                    event = name,
                    error = %err,
                    "async event handler failed"
                );
                self.publish_bus_error(&record, &err);
            }
        }

        true
    }

    /// Records and synchronously delivers a handler-failure event.
    ///
    /// Skips async handlers so a failing error-handler cannot recurse.
    fn publish_bus_error(&self, origin: &EventRecord, err: &HandlerError) {
        let record = EventRecord {
            id: new_id(),
            name: names::BUS_ERROR.to_string(),
            payload: json!({
                "original_event": origin.name,
                "error": err.to_string(),
            }),
            timestamp: Utc::now(),
        };
        let listeners = {
            let mut registry = self.registry();
            registry.record(&record);
            registry.take_listeners(names::BUS_ERROR)
        };
        for listener in &listeners {
            listener(&record);
        }
    }

    /// Registers a synchronous listener for `name` (or [`WILDCARD`]).
    pub fn subscribe(
        &self,
        name: &str,
        listener: impl Fn(&EventRecord) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_subscriber(name, false, Arc::new(listener))
    }

    /// Registers a listener that is removed after its first delivery.
    pub fn subscribe_once(
        &self,
        name: &str,
        listener: impl Fn(&EventRecord) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_subscriber(name, true, Arc::new(listener))
    }

    fn add_subscriber(&self, name: &str, once: bool, listener: Listener) -> SubscriptionId {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .listeners
            .entry(name.to_string())
            .or_default()
            .push(Subscriber { id, once, listener });
        id
    }

    /// Removes a subscriber; returns whether it was present.
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let Some(subs) = registry.listeners.get_mut(name) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Removes all listeners and async handlers for `name`.
    pub fn remove_all(&self, name: &str) {
        let mut registry = self.registry();
        registry.listeners.remove(name);
        registry.async_handlers.remove(name);
    }

    /// Registers an asynchronous handler for `name`.
    pub fn on_async(&self, name: &str, handler: Arc<dyn AsyncEventHandler>) {
        self.registry()
            .async_handlers
            .entry(name.to_string())
            .or_default()
            .push(handler);
    }

    /// Adds a delivery filter: returning `true` suppresses the event.
    pub fn add_filter(&self, name: &str, filter: impl Fn(&Value) -> bool + Send + Sync + 'static) {
        self.registry()
            .filters
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(filter));
    }

    /// Waits for the next event named `name`, up to `timeout`.
    ///
    /// Exactly one outcome fires, and the pending listener is cleared on
    /// whichever comes first.
    pub async fn wait_for(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<EventRecord, EventBusError> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.subscribe_once(name, move |event| {
            if let Ok(mut guard) = slot.lock() {
                if let Some(tx) = guard.take() {
                    let _ = tx.send(event.clone());
                }
            }
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(EventBusError::WaitChannelDropped {
                event: name.to_string(),
            }),
            Err(_) => {
                self.unsubscribe(name, id);
                Err(EventBusError::WaitTimeout {
                    event: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Returns up to `limit` most recent history entries, optionally filtered
    /// by event name.
    pub fn history(&self, name: Option<&str>, limit: usize) -> Vec<EventRecord> {
        let registry = self.registry();
        let matching: Vec<EventRecord> = registry
            .history
            .iter()
            .filter(|e| name.is_none_or(|n| e.name == n))
            .cloned()
            .collect();
        let start = matching.len().saturating_sub(limit);
        matching[start..].to_vec()
    }

    /// Per-name occurrence counts over the retained history.
    pub fn stats(&self) -> HashMap<String, EventStats> {
        let registry = self.registry();
        let mut stats: HashMap<String, EventStats> = HashMap::new();
        for event in &registry.history {
            stats
                .entry(event.name.clone())
                .and_modify(|s| {
                    s.count += 1;
                    s.last_occurrence = event.timestamp;
                })
                .or_insert(EventStats {
                    count: 1,
                    first_occurrence: event.timestamp,
                    last_occurrence: event.timestamp,
                });
        }
        stats
    }

    pub fn clear_history(&self) {
        self.registry().history.clear();
    }

    /// Drops all listeners, handlers, filters, and history.
    pub fn reset(&self) {
        *self.registry() = Registry::default();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn delivers_to_named_and_wildcard_subscribers() {
        let bus = EventBus::new();
        let named = Arc::new(AtomicUsize::new(0));
        let wild = Arc::new(AtomicUsize::new(0));

        let named_count = Arc::clone(&named);
        bus.subscribe("game:started", move |_| {
            named_count.fetch_add(1, Ordering::SeqCst);
        });
        let wild_count = Arc::clone(&wild);
        bus.subscribe(WILDCARD, move |_| {
            wild_count.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish("game:started", json!({})).await;
        bus.publish("game:paused", json!({})).await;

        assert_eq!(named.load(Ordering::SeqCst), 1);
        assert_eq!(wild.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn once_subscriber_fires_exactly_once() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        bus.subscribe_once("tick", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish("tick", json!({})).await;
        bus.publish("tick", json!({})).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn filter_suppresses_delivery_but_not_history() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        bus.subscribe("tick", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.add_filter("tick", |payload| payload["drop"] == json!(true));

        assert!(!bus.publish("tick", json!({"drop": true})).await);
        assert!(bus.publish("tick", json!({"drop": false})).await);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.history(Some("tick"), 10).len(), 2);
    }

    #[tokio::test]
    async fn wait_for_resolves_on_matching_event() {
        let bus = EventBus::new();
        let waiter = bus.clone();
        let task = tokio::spawn(async move {
            waiter.wait_for("done", Duration::from_secs(1)).await
        });

        // Give the waiter a chance to register.
        tokio::task::yield_now().await;
        bus.publish("done", json!({"ok": true})).await;

        let event = task.await.unwrap().unwrap();
        assert_eq!(event.name, "done");
        assert_eq!(event.payload["ok"], json!(true));
    }

    #[tokio::test]
    async fn wait_for_times_out_and_clears_listener() {
        let bus = EventBus::new();
        let err = bus.wait_for("never", Duration::from_millis(20)).await;
        assert!(matches!(err, Err(EventBusError::WaitTimeout { .. })));

        // The pending listener is gone: a later publish reaches no one and
        // a fresh wait still works.
        bus.publish("never", json!({})).await;
        let again = bus.wait_for("never", Duration::from_millis(20)).await;
        assert!(matches!(again, Err(EventBusError::WaitTimeout { .. })));
    }

    #[tokio::test]
    async fn failing_async_handler_is_isolated_and_reported() {
        struct FailingHandler;

        #[async_trait]
        impl AsyncEventHandler for FailingHandler {
            async fn handle(&self, _event: &EventRecord) -> Result<(), HandlerError> {
                Err("boom".into())
            }
        }

        let bus = EventBus::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let error_count = Arc::clone(&errors);
        bus.subscribe(names::BUS_ERROR, move |_| {
            error_count.fetch_add(1, Ordering::SeqCst);
        });
        bus.on_async("tick", Arc::new(FailingHandler));

        // Publisher is unaffected by the handler failure.
        assert!(bus.publish("tick", json!({})).await);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(bus.history(Some(names::BUS_ERROR), 10).len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let bus = EventBus::new();
        for i in 0..1_100 {
            bus.publish("tick", json!({ "i": i })).await;
        }
        let history = bus.history(None, 2_000);
        assert_eq!(history.len(), 1_000);
        // Oldest entries were evicted.
        assert_eq!(history[0].payload["i"], json!(100));
    }

    #[tokio::test]
    async fn stats_count_occurrences() {
        let bus = EventBus::new();
        bus.publish("a", json!({})).await;
        bus.publish("a", json!({})).await;
        bus.publish("b", json!({})).await;

        let stats = bus.stats();
        assert_eq!(stats["a"].count, 2);
        assert_eq!(stats["b"].count, 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_listener() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = bus.subscribe("tick", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe("tick", id));
        assert!(!bus.unsubscribe("tick", id));
        bus.publish("tick", json!({})).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
