//! Prometheus metrics for the event-stream client.
//!
//! - Connection state
//! - Reconnects, by the error that caused them
//! - Dispatched messages per event type
//! - Heartbeat round-trip time
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use evstream_core::{ConnectionState, ConnectionStatus};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};
use tracing::debug;

use crate::error::TelemetryResult;

/// WebSocket connection state (1 = connected, 0 = otherwise).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "evstream_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Connection state machine current state.
/// Labels: state (disconnected/connecting/connected/error)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "evstream_ws_state",
        "Connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Connection failures that lead to a reconnect.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "evstream_ws_reconnect_total",
        "Total connection failures by reason",
        &["reason"]
    )
    .unwrap()
});

/// Messages delivered to subscribers.
pub static MESSAGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "evstream_messages_total",
        "Total messages dispatched to subscribers",
        &["event_type"]
    )
    .unwrap()
});

/// Heartbeat round-trip time in milliseconds.
pub static HEARTBEAT_RTT_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "evstream_heartbeat_rtt_ms",
        "Heartbeat ping/pong round-trip time in milliseconds",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record WebSocket connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record WebSocket disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set the state machine state.
    /// Only the active state is 1, all others are 0.
    pub fn ws_state_set(state: ConnectionState) {
        set_one_hot(&WS_STATE, state);
    }

    /// Record a connection failure.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a status broadcast by the client.
    pub fn connection_status(status: &ConnectionStatus) {
        if status.is_connected() {
            Self::ws_connected();
        } else {
            Self::ws_disconnected();
        }
        Self::ws_state_set(status.state);

        if status.state == ConnectionState::Error {
            if let Some(err) = &status.error {
                Self::ws_reconnect(err.kind());
            }
        }
    }

    /// Record a dispatched message.
    pub fn message_dispatched(event_type: &str) {
        MESSAGES_TOTAL.with_label_values(&[event_type]).inc();
    }

    /// Record a heartbeat round trip.
    pub fn heartbeat_rtt(rtt_ms: f64) {
        HEARTBEAT_RTT_MS.observe(rtt_ms);
    }

    /// Render every registered metric in Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        debug!(families = families.len(), bytes = buffer.len(), "Rendered metrics");
        Ok(String::from_utf8(buffer)?)
    }
}

fn set_one_hot(gauge: &GaugeVec, state: ConnectionState) {
    for s in ConnectionState::all() {
        gauge.with_label_values(&[s.as_str()]).set(0.0);
    }
    gauge.with_label_values(&[state.as_str()]).set(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstream_core::ConnectionError;

    #[test]
    fn test_state_is_one_hot() {
        let gauge = GaugeVec::new(prometheus::Opts::new("state", "test"), &["state"]).unwrap();
        set_one_hot(&gauge, ConnectionState::Connecting);
        set_one_hot(&gauge, ConnectionState::Connected);

        let active: Vec<&str> = ConnectionState::all()
            .iter()
            .filter(|s| gauge.with_label_values(&[s.as_str()]).get() == 1.0)
            .map(|s| s.as_str())
            .collect();
        assert_eq!(active, ["connected"]);
    }

    #[test]
    fn test_error_status_counts_reason() {
        let counter = WS_RECONNECT_TOTAL.with_label_values(&["heartbeat_timeout"]);
        let before = counter.get();

        Metrics::connection_status(&ConnectionStatus::new(
            ConnectionState::Error,
            Some(ConnectionError::HeartbeatTimeout { timeout_ms: 10_000 }),
        ));
        assert_eq!(counter.get(), before + 1.0);
    }

    #[test]
    fn test_message_counter() {
        let counter = MESSAGES_TOTAL.with_label_values(&["vote.cast"]);
        let before = counter.get();
        Metrics::message_dispatched("vote.cast");
        Metrics::message_dispatched("vote.cast");
        assert_eq!(counter.get(), before + 2.0);
    }

    #[test]
    fn test_render_contains_metrics() {
        Metrics::message_dispatched("render.test");
        Metrics::heartbeat_rtt(12.0);
        let text = Metrics::render().unwrap();
        assert!(text.contains("evstream_messages_total"));
        assert!(text.contains("render.test"));
        assert!(text.contains("evstream_heartbeat_rtt_ms"));
    }
}
