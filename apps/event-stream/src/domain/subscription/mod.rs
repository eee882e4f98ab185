//! Subscription Registry
//!
//! Maps event-type tags to the handlers interested in them and fans each
//! decoded payload out to those handlers.
//!
//! # Design
//!
//! The registry tracks:
//! - Handlers per event type, each with a unique [`HandlerId`]
//! - Handler identity, so registering the same `Arc` handler twice under one
//!   type yields one entry
//!
//! Handlers are keyed by id, with a second index from handler address to id,
//! so subscribe and unsubscribe are constant time amortized.
//!
//! Dispatch iterates over a snapshot of the handler list taken at dispatch
//! start, in registration order. Handlers may subscribe or unsubscribe (themselves or others) while
//! running without affecting the round in progress.
//!
//! Handler failures are contained: an `Err` or a panic from one handler is
//! logged and counted, and the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use super::envelope::Payload;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier of a registered handler.
pub type HandlerId = u64;

/// A registered event handler.
pub type Handler = Arc<dyn Fn(&Payload) -> anyhow::Result<()> + Send + Sync>;

/// Failure of a single handler invocation.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler {id} failed: {source}")]
    Failed {
        /// Handler that failed.
        id: HandlerId,
        /// Error returned by the handler.
        source: anyhow::Error,
    },

    /// The handler panicked.
    #[error("handler {id} panicked: {message}")]
    Panicked {
        /// Handler that panicked.
        id: HandlerId,
        /// Panic message, if it was a string.
        message: String,
    },
}

/// Result of one dispatch round.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failures: Vec<HandlerError>,
}

impl DispatchOutcome {
    /// Total number of handlers invoked in this round.
    #[must_use]
    pub fn invoked(&self) -> usize {
        self.delivered + self.failures.len()
    }
}

/// Handlers registered under one event type.
#[derive(Default)]
struct TypeHandlers {
    by_id: HashMap<HandlerId, Handler>,
    /// Handler allocation address to id. Entries in `by_id` keep the
    /// allocation alive, so an address is never reused while indexed.
    by_address: HashMap<usize, HandlerId>,
}

impl TypeHandlers {
    fn len(&self) -> usize {
        self.by_id.len()
    }

    fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let Some(handler) = self.by_id.remove(&id) else {
            return false;
        };
        self.by_address.remove(&handler_address(&handler));
        true
    }

    /// Handlers in registration order.
    fn snapshot(&self) -> Vec<(HandlerId, Handler)> {
        let mut handlers: Vec<_> = self
            .by_id
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();
        handlers.sort_unstable_by_key(|(id, _)| *id);
        handlers
    }
}

fn handler_address(handler: &Handler) -> usize {
    Arc::as_ptr(handler).cast::<()>().addr()
}

#[derive(Default)]
struct RegistryInner {
    handlers: RwLock<HashMap<String, TypeHandlers>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, message_type: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(entries) = handlers.get_mut(message_type) else {
            return false;
        };

        let removed = entries.remove(id);

        // Clean up empty type entry
        if entries.is_empty() {
            handlers.remove(message_type);
        }

        removed
    }
}

// =============================================================================
// Subscription Token
// =============================================================================

/// Capability returned by `subscribe` that removes exactly one handler.
///
/// Dropping the token does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<RegistryInner>,
    message_type: String,
    id: HandlerId,
}

impl Subscription {
    /// Remove the handler this token was issued for.
    ///
    /// Idempotent: a handler that is already gone (or a registry that has been
    /// dropped) makes this a no-op.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.message_type, self.id);
        }
    }

    /// Identifier of the subscribed handler.
    #[must_use]
    pub const fn id(&self) -> HandlerId {
        self.id
    }

    /// Event type the handler is registered under.
    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.message_type
    }
}

impl std::fmt::Debug for RegistryInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("RegistryInner")
            .field("types", &handlers.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe mapping from event type to handlers.
///
/// Cloning the registry yields another handle to the same handler table.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use event_stream::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&hits);
/// let subscription = registry.subscribe("price", move |_payload| {
///     counter.fetch_add(1, Ordering::SeqCst);
///     Ok(())
/// });
///
/// registry.dispatch("price", &serde_json::json!({"value": 1}));
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
///
/// subscription.unsubscribe();
/// registry.dispatch("price", &serde_json::json!({"value": 2}));
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type.
    pub fn subscribe<F>(&self, message_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(message_type, Arc::new(handler))
    }

    /// Register a handler that receives the payload decoded as `T`.
    ///
    /// A payload that does not deserialize into `T` counts as a failure of this
    /// handler only.
    pub fn subscribe_as<T, F>(&self, message_type: impl Into<String>, handler: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(message_type, move |payload: &Payload| {
            let value = T::deserialize(payload)?;
            handler(value)
        })
    }

    /// Register an already shared handler.
    ///
    /// Registering the same `Arc` twice under one type is coalesced: the
    /// existing entry is kept and a token for it is returned.
    pub fn subscribe_handler(
        &self,
        message_type: impl Into<String>,
        handler: Handler,
    ) -> Subscription {
        let message_type = message_type.into();
        let mut handlers = self.inner.handlers.write();
        let entries = handlers.entry(message_type.clone()).or_default();

        let address = handler_address(&handler);
        let id = if let Some(&existing) = entries.by_address.get(&address) {
            tracing::debug!(
                message_type = %message_type,
                handler_id = existing,
                "Handler already subscribed"
            );
            existing
        } else {
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            entries.by_address.insert(address, id);
            entries.by_id.insert(id, handler);
            id
        };

        Subscription {
            registry: Arc::downgrade(&self.inner),
            message_type,
            id,
        }
    }

    /// Remove a handler from an event type.
    ///
    /// Returns `true` if a handler was removed. Removing an unknown handler is
    /// a no-op.
    pub fn unsubscribe(&self, message_type: &str, id: HandlerId) -> bool {
        self.inner.remove(message_type, id)
    }

    /// Invoke every handler registered for `message_type` with `payload`.
    ///
    /// The handler list is snapshotted before the first invocation and no lock
    /// is held while handlers run.
    pub fn dispatch(&self, message_type: &str, payload: &Payload) -> DispatchOutcome {
        let snapshot = self
            .inner
            .handlers
            .read()
            .get(message_type)
            .map(TypeHandlers::snapshot)
            .unwrap_or_default();

        let mut outcome = DispatchOutcome::default();

        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(source)) => {
                    tracing::warn!(
                        message_type,
                        handler_id = id,
                        error = %source,
                        "Event handler failed"
                    );
                    outcome.failures.push(HandlerError::Failed {
                        id,
                        source,
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(
                        message_type,
                        handler_id = id,
                        panic = %message,
                        "Event handler panicked"
                    );
                    outcome.failures.push(HandlerError::Panicked {
                        id,
                        message,
                    });
                }
            }
        }

        outcome
    }

    /// Remove every handler for every type.
    pub fn clear(&self) {
        self.inner.handlers.write().clear();
    }

    /// Number of handlers registered for a type.
    #[must_use]
    pub fn handler_count(&self, message_type: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(message_type)
            .map_or(0, TypeHandlers::len)
    }

    /// Event types with at least one handler.
    #[must_use]
    pub fn message_types(&self) -> Vec<String> {
        self.inner.handlers.read().keys().cloned().collect()
    }

    /// Get overall statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let handlers = self.inner.handlers.read();
        RegistryStats {
            type_count: handlers.len(),
            handler_count: handlers.values().map(TypeHandlers::len).sum(),
        }
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.handlers.read().is_empty()
    }
}

/// Registry size statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of event types with handlers.
    pub type_count: usize,
    /// Number of handlers across all types.
    pub handler_count: usize,
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn counting_handler(
        hits: Arc<AtomicUsize>,
    ) -> impl Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static {
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn dispatch_reaches_handlers_of_matching_type_only() {
        let registry = SubscriptionRegistry::new();
        let prices = Arc::new(AtomicUsize::new(0));
        let news = Arc::new(AtomicUsize::new(0));

        let _ = registry.subscribe("price", counting_handler(Arc::clone(&prices)));
        let _ = registry.subscribe("news", counting_handler(Arc::clone(&news)));

        let outcome = registry.dispatch("price", &json!({}));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(prices.load(Ordering::SeqCst), 1);
        assert_eq!(news.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_passes_payload_through() {
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _ = registry.subscribe("price", move |payload| {
            sink.lock().push(payload.clone());
            Ok(())
        });

        let payload = json!({"symbol": "ABC", "value": 101.5});
        registry.dispatch("price", &payload);
        assert_eq!(*seen.lock(), vec![payload]);
    }

    #[test]
    fn dispatch_without_handlers_is_empty() {
        let registry = SubscriptionRegistry::new();
        let outcome = registry.dispatch("unknown", &Payload::Null);
        assert_eq!(outcome.invoked(), 0);
    }

    #[test]
    fn token_removes_only_its_handler() {
        let registry = SubscriptionRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let token = registry.subscribe("price", counting_handler(Arc::clone(&first)));
        let _ = registry.subscribe("price", counting_handler(Arc::clone(&second)));

        token.unsubscribe();
        registry.dispatch("price", &json!(1));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let token = registry.subscribe("price", |_| Ok(()));
        let id = token.id();

        assert!(registry.unsubscribe("price", id));
        assert!(!registry.unsubscribe("price", id));
        assert!(!registry.unsubscribe("never", 42));

        // Token for an already removed handler is a no-op
        token.unsubscribe();
    }

    #[test]
    fn empty_type_entries_are_removed() {
        let registry = SubscriptionRegistry::new();
        let token = registry.subscribe("price", |_| Ok(()));
        assert_eq!(registry.message_types(), vec!["price".to_string()]);

        token.unsubscribe();
        assert!(registry.is_empty());
        assert_eq!(registry.handler_count("price"), 0);
    }

    #[test]
    fn same_handler_twice_is_coalesced() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handler: Handler = Arc::new(counting_handler(Arc::clone(&hits)));

        let a = registry.subscribe_handler("price", Arc::clone(&handler));
        let b = registry.subscribe_handler("price", Arc::clone(&handler));
        assert_eq!(a.id(), b.id());
        assert_eq!(registry.handler_count("price"), 1);

        registry.dispatch("price", &json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Same handler under a different type is a separate entry
        let c = registry.subscribe_handler("news", handler);
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn resubscribing_removed_handler_gets_new_id() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handler: Handler = Arc::new(counting_handler(Arc::clone(&hits)));

        let first = registry.subscribe_handler("price", Arc::clone(&handler));
        let first_id = first.id();
        first.unsubscribe();
        assert_eq!(registry.handler_count("price"), 0);

        let second = registry.subscribe_handler("price", handler);
        assert_ne!(second.id(), first_id);
        assert_eq!(registry.handler_count("price"), 1);

        registry.dispatch("price", &json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interleaved_subscribe_and_unsubscribe_keep_counts() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let tokens: Vec<Subscription> = (0..1000)
            .map(|n| {
                let order = Arc::clone(&order);
                registry.subscribe("tick", move |_| {
                    order.lock().push(n);
                    Ok(())
                })
            })
            .collect();

        for token in tokens.iter().step_by(2) {
            assert!(registry.unsubscribe("tick", token.id()));
        }
        assert_eq!(registry.handler_count("tick"), 500);
        assert_eq!(
            registry.stats(),
            RegistryStats {
                type_count: 1,
                handler_count: 500
            }
        );

        let outcome = registry.dispatch("tick", &json!(null));
        assert_eq!(outcome.delivered, 500);
        let expected: Vec<i32> = (1..1000).step_by(2).collect();
        assert_eq!(*order.lock(), expected);

        for token in tokens {
            token.unsubscribe();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn handler_subscribed_during_dispatch_runs_next_round() {
        let registry = SubscriptionRegistry::new();
        let late_hits = Arc::new(AtomicUsize::new(0));
        let added = Arc::new(AtomicUsize::new(0));

        let inner_registry = registry.clone();
        let late = Arc::clone(&late_hits);
        let added_flag = Arc::clone(&added);
        let _ = registry.subscribe("price", move |_| {
            if added_flag.fetch_add(1, Ordering::SeqCst) == 0 {
                let late = Arc::clone(&late);
                let _ = inner_registry.subscribe("price", move |_| {
                    late.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
            Ok(())
        });

        let first = registry.dispatch("price", &json!(1));
        assert_eq!(first.invoked(), 1);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);

        let second = registry.dispatch("price", &json!(2));
        assert_eq!(second.invoked(), 2);
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_unsubscribing_peer_does_not_skip_it_this_round() {
        let registry = SubscriptionRegistry::new();
        let peer_hits = Arc::new(AtomicUsize::new(0));
        let peer_id = Arc::new(AtomicU64::new(u64::MAX));

        let inner_registry = registry.clone();
        let target = Arc::clone(&peer_id);
        let _ = registry.subscribe("price", move |_| {
            inner_registry.unsubscribe("price", target.load(Ordering::SeqCst));
            Ok(())
        });
        let peer = registry.subscribe("price", counting_handler(Arc::clone(&peer_hits)));
        peer_id.store(peer.id(), Ordering::SeqCst);

        registry.dispatch("price", &json!(1));
        assert_eq!(peer_hits.load(Ordering::SeqCst), 1);

        registry.dispatch("price", &json!(2));
        assert_eq!(peer_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_handler_does_not_stop_the_round() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _ = registry.subscribe("price", |_| Err(anyhow::anyhow!("boom")));
        let _ = registry.subscribe("price", |_| panic!("handler exploded"));
        let _ = registry.subscribe("price", counting_handler(Arc::clone(&hits)));

        let outcome = registry.dispatch("price", &json!(1));

        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failures.len(), 2);
        assert!(matches!(outcome.failures[0], HandlerError::Failed { .. }));
        assert!(matches!(
            &outcome.failures[1],
            HandlerError::Panicked { message, .. } if message == "handler exploded"
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug, Deserialize)]
    struct PriceUpdate {
        symbol: String,
        value: f64,
    }

    #[test]
    fn typed_subscription_decodes_payload() {
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&seen);
        let _ = registry.subscribe_as("price", move |update: PriceUpdate| {
            *sink.lock() = Some((update.symbol, update.value));
            Ok(())
        });

        let outcome = registry.dispatch("price", &json!({"symbol": "ABC", "value": 101.5}));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(*seen.lock(), Some(("ABC".to_string(), 101.5)));
    }

    #[test]
    fn typed_subscription_mismatch_is_isolated() {
        let registry = SubscriptionRegistry::new();
        let raw_hits = Arc::new(AtomicUsize::new(0));

        let _ = registry.subscribe_as("price", |_: PriceUpdate| Ok(()));
        let _ = registry.subscribe("price", counting_handler(Arc::clone(&raw_hits)));

        let outcome = registry.dispatch("price", &json!({"unexpected": true}));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(raw_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_removes_everything() {
        let registry = SubscriptionRegistry::new();
        let _ = registry.subscribe("a", |_| Ok(()));
        let _ = registry.subscribe("b", |_| Ok(()));
        let _ = registry.subscribe("b", |_| Ok(()));

        assert_eq!(
            registry.stats(),
            RegistryStats {
                type_count: 2,
                handler_count: 3
            }
        );

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn token_outliving_registry_is_harmless() {
        let registry = SubscriptionRegistry::new();
        let token = registry.subscribe("price", |_| Ok(()));
        drop(registry);
        token.unsubscribe();
    }
}
