//! Subscription registry.
//!
//! Maps event types to independent handler sets. Several consumers may
//! subscribe to the same event type; unsubscribing removes only the one
//! handler behind the returned handle. Subscriptions are independent of the
//! connection lifecycle and survive reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use evstream_core::{Message, WILDCARD};
use parking_lot::RwLock;
use tracing::debug;

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Opaque token returned by `subscribe`, passed back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    event_type: String,
}

impl SubscriptionHandle {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// Subscription registry, safe to mutate from any thread, including from
/// inside a handler during dispatch.
#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: RwLock<HashMap<String, Vec<(u64, EventHandler)>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type` (`"*"` for every message).
    ///
    /// # Panics
    ///
    /// Panics if `event_type` is empty.
    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        assert!(!event_type.is_empty(), "event type must not be empty");

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(event_type, id, "Subscribed");

        SubscriptionHandle {
            id,
            event_type: event_type.to_string(),
        }
    }

    /// Remove the handler behind `handle`. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut handlers = self.handlers.write();
        let Some(entries) = handlers.get_mut(&handle.event_type) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(id, _)| *id != handle.id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            handlers.remove(&handle.event_type);
        }
        if removed {
            debug!(event_type = %handle.event_type, id = handle.id, "Unsubscribed");
        }
        removed
    }

    /// Snapshot of the handlers a message of `event_type` is delivered to:
    /// exact-type handlers first, then wildcard handlers.
    pub fn handlers_for(&self, event_type: &str) -> Vec<EventHandler> {
        let handlers = self.handlers.read();
        let exact = handlers.get(event_type).into_iter().flatten();
        let wildcard = if event_type == WILDCARD {
            None
        } else {
            handlers.get(WILDCARD)
        };
        exact
            .chain(wildcard.into_iter().flatten())
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }

    /// Number of handlers registered under exactly `event_type`.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Event types with at least one handler.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
