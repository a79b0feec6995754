//! Event registry with correlation-aware dispatch.
//!
//! The registry maps an event name to a set of callbacks keyed by
//! [`CorrelationKey`]:
//!
//! ```text
//! "user_enter"       → { Default        → callback }
//! "chat/new_message" → { Default        → callback,
//!                        Correlated(T1) → one-shot reply callback }
//! ```
//!
//! At most one callback lives under each `(name, key)` pair; registering
//! again replaces the previous one.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::identifiers::{CorrelationId, CorrelationKey};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked with an event payload.
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Event name → correlation key → callback.
type Registry = FxHashMap<String, FxHashMap<CorrelationKey, EventCallback>>;

// ============================================================================
// Subscription
// ============================================================================

/// A registration request for [`Reactor::add_event`].
#[derive(Clone)]
pub struct Subscription {
    /// Event name.
    pub name: String,
    /// Callback to store.
    pub callback: EventCallback,
    /// Registry key, [`CorrelationKey::Default`] for standing subscriptions.
    pub key: CorrelationKey,
}

impl Subscription {
    /// Creates a standing subscription.
    #[must_use]
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
            key: CorrelationKey::Default,
        }
    }

    /// Creates a subscription from an already shared callback.
    #[must_use]
    pub fn from_callback(name: impl Into<String>, callback: EventCallback) -> Self {
        Self {
            name: name.into(),
            callback,
            key: CorrelationKey::Default,
        }
    }

    /// Keys the subscription to a one-shot correlation id.
    #[inline]
    #[must_use]
    pub fn correlated(mut self, id: CorrelationId) -> Self {
        self.key = CorrelationKey::Correlated(id);
        self
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reactor
// ============================================================================

/// Subscription and correlation registry.
///
/// Cheap to clone; clones share the same registry. Callbacks are always
/// invoked with the registry unlocked, so a callback may subscribe or
/// publish without deadlocking.
#[derive(Clone, Default)]
pub struct Reactor {
    events: Arc<Mutex<Registry>>,
}

impl Reactor {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a callback under `(name, key)`.
    ///
    /// Silently replaces an existing callback for the same pair. An empty
    /// event name is a no-op.
    ///
    /// Returns `true` if the callback was stored.
    pub fn add_event(&self, subscription: Subscription) -> bool {
        let Subscription {
            name,
            callback,
            key,
        } = subscription;

        if name.is_empty() {
            debug!("Ignoring subscription with empty event name");
            return false;
        }

        let replaced = self
            .events
            .lock()
            .entry(name.clone())
            .or_default()
            .insert(key, callback)
            .is_some();

        trace!(event = %name, %key, replaced, "Callback registered");
        true
    }

    /// Registers a standing subscription for `name`.
    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F) -> bool
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.add_event(Subscription::new(name, callback))
    }

    /// Subscribes to `name` and forwards every payload into a channel.
    ///
    /// Lets async code await pushed events instead of handling them in a
    /// callback. Replaces any standing subscription for `name`.
    pub fn event_channel(&self, name: impl Into<String>) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(name, move |payload| {
            let _ = tx.send(payload);
        });
        rx
    }

    /// Invokes the callback stored under `(name, key)`.
    ///
    /// Absent entries are silently dropped. The entry is left in place, even
    /// for a correlated key; see [`Reactor::dispatch_once`].
    ///
    /// Returns `true` if a callback ran.
    pub fn dispatch(&self, name: &str, key: &CorrelationKey, payload: Value) -> bool {
        let callback = self
            .events
            .lock()
            .get(name)
            .and_then(|callbacks| callbacks.get(key))
            .cloned();

        match callback {
            Some(callback) => {
                callback(payload);
                true
            }
            None => {
                trace!(event = %name, %key, "No subscriber, dropping event");
                false
            }
        }
    }

    /// Removes the one-shot entry under `(name, id)` and invokes it.
    ///
    /// The entry is gone afterwards whether or not it existed, so a second
    /// call with the same pair is a no-op.
    ///
    /// Returns `true` if a callback ran.
    pub fn dispatch_once(&self, name: &str, id: CorrelationId, payload: Value) -> bool {
        match self.take(name, &CorrelationKey::Correlated(id)) {
            Some(callback) => {
                callback(payload);
                true
            }
            None => {
                debug!(event = %name, correlation_id = %id, "Reply for unknown correlation");
                false
            }
        }
    }

    /// Removes a pending one-shot registration without invoking it.
    ///
    /// Returns `true` if an entry was removed.
    pub fn cancel(&self, name: &str, id: CorrelationId) -> bool {
        let removed = self
            .take(name, &CorrelationKey::Correlated(id))
            .is_some();
        if removed {
            debug!(event = %name, correlation_id = %id, "One-shot registration cancelled");
        }
        removed
    }

    /// Returns `true` if a callback is stored under `(name, key)`.
    #[must_use]
    pub fn contains(&self, name: &str, key: &CorrelationKey) -> bool {
        self.events
            .lock()
            .get(name)
            .is_some_and(|callbacks| callbacks.contains_key(key))
    }

    /// Returns the number of pending one-shot registrations.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.count_where(CorrelationKey::is_correlated)
    }

    /// Returns the number of standing subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.count_where(|key| !key.is_correlated())
    }

    fn count_where(&self, predicate: impl Fn(&CorrelationKey) -> bool) -> usize {
        self.events
            .lock()
            .values()
            .map(|callbacks| callbacks.keys().filter(|key| predicate(*key)).count())
            .sum()
    }

    /// Removes and returns the callback under `(name, key)`, pruning an
    /// emptied inner map.
    fn take(&self, name: &str, key: &CorrelationKey) -> Option<EventCallback> {
        let mut events = self.events.lock();
        let callbacks = events.get_mut(name)?;
        let callback = callbacks.remove(key);
        if callbacks.is_empty() {
            events.remove(name);
        }
        callback
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("subscriptions", &self.subscription_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
