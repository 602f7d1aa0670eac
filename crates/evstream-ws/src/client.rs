//! Public event-stream client.
//!
//! Owns the connection manager and the subscription registry and exposes the
//! operations callers use: connect/disconnect, sending, state observation and
//! per-event-type subscriptions. Cloning is cheap; every clone drives the
//! same connection.

use std::sync::Arc;
use std::time::Duration;

use evstream_core::{ConnectionStatus, Message};
use tokio::sync::watch;

use crate::connection::{ConnectionConfig, ConnectionManager, ObserverHandle};
use crate::credential::CredentialSource;
use crate::dispatcher::Dispatcher;
use crate::error::WsResult;
use crate::heartbeat::HeartbeatStats;
use crate::subscription::{SubscriptionHandle, SubscriptionRegistry};
use crate::transport::{Transport, TungsteniteTransport};

/// Resilient, authenticated real-time event client.
///
/// # Example
///
/// ```no_run
/// use evstream_ws::{ConnectionConfig, EnvCredential, EventStreamClient};
///
/// # tokio_test::block_on(async {
/// let config = ConnectionConfig {
///     url: "wss://events.example.com/ws".to_string(),
///     ..ConnectionConfig::default()
/// };
/// let client = EventStreamClient::new(config, EnvCredential::new("EVSTREAM_TOKEN"))?;
/// client.subscribe("vote.cast", |msg| println!("{}", msg.payload));
/// client.on_connection_state_change(|status| println!("{status}"));
/// client.connect();
/// # Ok::<(), evstream_ws::WsError>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct EventStreamClient {
    connection: ConnectionManager,
    dispatcher: Arc<Dispatcher>,
}

impl EventStreamClient {
    /// Create a client over tokio-tungstenite. Must be called within a tokio
    /// runtime. Does not connect.
    pub fn new<C>(config: ConnectionConfig, credentials: C) -> WsResult<Self>
    where
        C: CredentialSource + 'static,
    {
        let transport =
            TungsteniteTransport::new(Duration::from_millis(config.connect_timeout_ms));
        Self::with_transport(config, Arc::new(credentials), Arc::new(transport))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(
        config: ConnectionConfig,
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
    ) -> WsResult<Self> {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(SubscriptionRegistry::new())));
        let connection =
            ConnectionManager::new(config, credentials, transport, Arc::clone(&dispatcher))?;
        Ok(Self {
            connection,
            dispatcher,
        })
    }

    /// Start connecting. No-op while connecting or connected.
    pub fn connect(&self) {
        self.connection.connect();
    }

    /// Close the connection and stop auto-reconnect.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Drop the current connection and reconnect immediately.
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    /// Send a message. Returns `false` (and sends nothing) unless connected.
    pub fn send(&self, msg: &Message) -> bool {
        self.connection.send(msg)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Observe connection state. The handler is called once right away with
    /// the current status, then on every change.
    pub fn on_connection_state_change<F>(&self, handler: F) -> ObserverHandle
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.connection.on_state_change(handler)
    }

    pub fn remove_connection_state_observer(&self, handle: ObserverHandle) -> bool {
        self.connection.remove_state_observer(handle)
    }

    /// Subscribe to one event type, or `"*"` for every message except `pong`.
    ///
    /// # Panics
    ///
    /// Panics if `event_type` is empty.
    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.dispatcher.registry().subscribe(event_type, handler)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.dispatcher.registry().unsubscribe(handle)
    }

    /// Timestamp of the last received event, for gap-filling after a reconnect.
    pub fn last_event_timestamp(&self) -> Option<String> {
        self.dispatcher.last_event_timestamp()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.watch_state()
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.connection.heartbeat_stats()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.connection.reconnect_attempt()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.connection.reconnect_pending()
    }

    /// Messages delivered to subscribers since creation.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatcher.dispatched_count()
    }
}
