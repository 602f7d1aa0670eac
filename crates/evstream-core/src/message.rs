//! Event stream message envelope.
//!
//! Wire shape: `{"type": string, "payload": any, "timestamp": RFC3339, "requestId"?: string}`.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Outbound heartbeat probe.
pub const PING_TYPE: &str = "ping";
/// Inbound heartbeat reply. Consumed by the heartbeat monitor, never dispatched.
pub const PONG_TYPE: &str = "pong";
/// Subscription key that receives every dispatched message.
pub const WILDCARD: &str = "*";

/// A single message on the event stream.
///
/// Messages are immutable once received; identity is structural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Event type used for subscription routing.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque payload. Missing payloads decode as `null`.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// RFC3339 timestamp assigned by the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Optional correlation ID.
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Some(now_rfc3339()),
            request_id: None,
        }
    }

    /// Create a message carrying a fresh UUID v4 `requestId`.
    pub fn request(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(event_type, payload).with_request_id(Uuid::new_v4().to_string())
    }

    /// Attach a correlation ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Heartbeat probe with an empty payload.
    pub fn ping() -> Self {
        Self::new(PING_TYPE, serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Check if this is a heartbeat reply.
    pub fn is_pong(&self) -> bool {
        self.event_type == PONG_TYPE
    }

    /// Parse a raw text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        let msg: Self = serde_json::from_str(text)?;
        if msg.event_type.is_empty() {
            return Err(CoreError::InvalidMessage("empty type".to_string()));
        }
        Ok(msg)
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
