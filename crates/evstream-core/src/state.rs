//! Coarse connection state for UI display.

use std::fmt;

use crate::error::ConnectionError;

/// Connection lifecycle state. Exactly one value holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Initial state, and the state after an explicit disconnect or clean close.
    #[default]
    Disconnected,
    /// A transport open is in flight.
    Connecting,
    /// The transport is open and the heartbeat is running.
    Connected,
    /// The last attempt failed or the connection dropped abnormally.
    Error,
}

impl ConnectionState {
    /// All states, in declaration order.
    pub const fn all() -> &'static [ConnectionState] {
        &[
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Error,
        ]
    }

    /// Get the string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current state plus the last connection error, as broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub error: Option<ConnectionError>,
}

impl ConnectionStatus {
    pub fn new(state: ConnectionState, error: Option<ConnectionError>) -> Self {
        Self { state, error }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{} ({})", self.state, err),
            None => write!(f, "{}", self.state),
        }
    }
}
