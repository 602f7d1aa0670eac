//! Error types for evstream-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Reason a connection ended up in the `error` state.
///
/// Surfaced to observers through [`crate::ConnectionStatus`]; never thrown
/// out of a public method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The credential source had nothing to offer. No socket was opened.
    #[error("No credential available")]
    NoCredential,

    /// The peer (or the network) closed the connection with a non-clean code.
    #[error("Connection closed abnormally: code={code}, reason={reason}")]
    AbnormalClose { code: u16, reason: String },

    /// No pong arrived within the pong timeout.
    #[error("Heartbeat timeout: no pong within {timeout_ms}ms")]
    HeartbeatTimeout { timeout_ms: u64 },

    /// The transport could not be opened or failed mid-stream.
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::AbnormalClose { .. } => "abnormal_close",
            Self::HeartbeatTimeout { .. } => "heartbeat_timeout",
            Self::Transport(_) => "transport",
        }
    }
}
