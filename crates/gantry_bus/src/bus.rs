//! Kind-keyed pub/sub registry.
//!
//! Handlers for one kind run sequentially in registration order within a
//! single `publish` call. Distinct publishers do not serialize against each
//! other: the handler list is snapshotted under the lock and invoked after it
//! is released, so a slow handler delays its own publisher only.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// An event that can travel on an [`EventBus`].
///
/// The kind is the subscription key; each kind fixes its payload shape in the
/// concrete event enum.
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// Subscription key type
    type Kind: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static;

    /// The kind of this event
    fn kind(&self) -> Self::Kind;
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(E) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Subscription<E> {
    id: SubscriptionId,
    handler: Handler<E>,
}

impl<E> Clone for Subscription<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct Registry<E: BusEvent> {
    next_id: u64,
    subscriptions: HashMap<E::Kind, Vec<Subscription<E>>>,
}

/// Typed in-process event bus.
///
/// Cheap to clone; all clones share one registry. Pass the instance through
/// constructors at composition time so tests can inject a fresh bus.
pub struct EventBus<E: BusEvent> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> EventBus<E> {
    /// Create a new bus with no subscriptions
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                subscriptions: HashMap::new(),
            })),
        }
    }

    /// Register a handler for one event kind.
    ///
    /// Handlers are invoked in registration order.
    pub fn subscribe<F, Fut>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Handler<E> = Arc::new(move |event| Box::pin(handler(event)));
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .subscriptions
            .entry(kind)
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    /// Remove a handler. Returns whether it was present.
    pub fn unsubscribe(&self, kind: E::Kind, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = registry.subscriptions.get_mut(&kind) {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            return subs.len() != before;
        }
        false
    }

    /// Publish an event to every handler registered for its kind.
    ///
    /// Each handler is awaited to completion before the next runs. Handler
    /// errors are logged and do not stop subsequent handlers.
    pub async fn publish(&self, event: E) {
        let kind = event.kind();
        let subs: Vec<Subscription<E>> = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.subscriptions.get(&kind).cloned().unwrap_or_default()
        };
        for sub in subs {
            if let Err(err) = (sub.handler)(event.clone()).await {
                tracing::error!(kind = ?kind, error = %format!("{err:#}"), "event handler failed");
            }
        }
    }

    /// Number of handlers registered for a kind
    #[must_use]
    pub fn handler_count(&self, kind: E::Kind) -> usize {
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.subscriptions.get(&kind).map_or(0, Vec::len)
    }
}
