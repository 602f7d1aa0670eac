//! Inbound message dispatch.
//!
//! Frames are parsed into [`Message`]s. `pong` is routed to the heartbeat
//! monitor by the caller and never reaches subscribers. Every other message
//! updates the last-event timestamp and is delivered to exact-type handlers,
//! then wildcard handlers, each isolated from the others' panics.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use evstream_core::Message;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::error::{WsError, WsResult};
use crate::subscription::SubscriptionRegistry;

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Heartbeat reply.
    Pong,
    /// Application event.
    Event(Message),
}

/// Parse a raw text frame.
pub fn decode(text: &str) -> WsResult<Inbound> {
    let msg = Message::from_json(text).map_err(|e| WsError::ParseError(e.to_string()))?;
    if msg.is_pong() {
        return Ok(Inbound::Pong);
    }
    Ok(Inbound::Event(msg))
}

/// Delivers events to the subscription registry.
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    last_event_timestamp: RwLock<Option<String>>,
    dispatched: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            last_event_timestamp: RwLock::new(None),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Timestamp of the most recently dispatched message, for gap-filling queries.
    pub fn last_event_timestamp(&self) -> Option<String> {
        self.last_event_timestamp.read().clone()
    }

    /// Total messages dispatched since creation.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Deliver `msg` to its subscribers. Returns the number of handlers that
    /// completed without panicking.
    pub fn dispatch(&self, msg: &Message) -> usize {
        if msg.is_pong() {
            return 0;
        }

        if let Some(ts) = &msg.timestamp {
            *self.last_event_timestamp.write() = Some(ts.clone());
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        // Snapshot: handlers may (un)subscribe while being invoked
        let handlers = self.registry.handlers_for(&msg.event_type);
        debug!(
            event_type = %msg.event_type,
            handlers = handlers.len(),
            "Dispatching message"
        );

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(msg))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    error!(
                        event_type = %msg.event_type,
                        panic = %panic_message(&*panic),
                        "Subscriber handler panicked"
                    );
                }
            }
        }
        delivered
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
