//! Resilient, authenticated WebSocket event-stream client.
//!
//! Provides:
//! - Bearer credential attached to every connect attempt, fetched fresh each time
//! - Automatic reconnection with exponential backoff
//! - Application-level ping/pong heartbeat for half-open detection
//! - Per-event-type subscriptions with a `"*"` wildcard
//! - Observable connection state

pub mod client;
pub mod connection;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod machine;
pub mod reconnect;
pub mod subscription;
pub mod transport;

pub use client::EventStreamClient;
pub use connection::{ConnectionConfig, ConnectionManager, ObserverHandle, StateHandler};
pub use credential::{CredentialSource, EnvCredential, StaticCredential};
pub use dispatcher::{decode, Dispatcher, Inbound};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatStats;
pub use reconnect::BackoffPolicy;
pub use subscription::{EventHandler, SubscriptionHandle, SubscriptionRegistry};
pub use transport::{
    OutboundFrame, Transport, TransportEvent, TransportLink, TransportPeer, TungsteniteTransport,
};

pub use evstream_core::{ConnectionError, ConnectionState, ConnectionStatus, Message};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
