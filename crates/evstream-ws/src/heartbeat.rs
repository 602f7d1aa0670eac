//! Heartbeat monitoring for half-open connection detection.
//!
//! On every interval tick a `ping` is sent unless one is already outstanding.
//! A matching `pong` must arrive within the pong timeout; otherwise the
//! state machine force-closes the transport.
//!
//! State is created fresh on every successful open and fully torn down on
//! every disconnect.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::machine::{Effect, TimerId, TimerIds, TimerKind};

/// Heartbeat monitor owned by the connection state machine.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    /// How often to send ping.
    interval: Duration,
    /// How long to wait for pong.
    pong_timeout: Duration,
    /// Whether we're waiting for pong.
    awaiting_pong: bool,
    /// Pending interval timer.
    ping_timer: Option<TimerId>,
    /// Pending pong-timeout timer.
    pong_timer: Option<TimerId>,
    /// Last ping sent time.
    last_ping: Option<DateTime<Utc>>,
    /// Last pong received time.
    last_pong: Option<DateTime<Utc>>,
    /// Round-trip time of the last ping/pong pair.
    last_rtt_ms: Option<i64>,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor.
    pub fn new(interval_ms: u64, pong_timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            pong_timeout: Duration::from_millis(pong_timeout_ms),
            awaiting_pong: false,
            ping_timer: None,
            pong_timer: None,
            last_ping: None,
            last_pong: None,
            last_rtt_ms: None,
        }
    }

    pub fn pong_timeout_ms(&self) -> u64 {
        self.pong_timeout.as_millis() as u64
    }

    pub fn is_running(&self) -> bool {
        self.ping_timer.is_some()
    }

    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    /// Start monitoring a freshly opened connection.
    pub fn start(&mut self, timers: &mut TimerIds, fx: &mut Vec<Effect>) {
        self.stop(fx);
        self.last_ping = None;
        self.last_pong = None;
        self.last_rtt_ms = None;
        self.arm_ping(timers, fx);
        debug!(interval_ms = self.interval.as_millis() as u64, "Heartbeat started");
    }

    /// Cancel both timers. Idempotent.
    pub fn stop(&mut self, fx: &mut Vec<Effect>) {
        if let Some(id) = self.ping_timer.take() {
            fx.push(Effect::CancelTimer(id));
        }
        if let Some(id) = self.pong_timer.take() {
            fx.push(Effect::CancelTimer(id));
        }
        self.awaiting_pong = false;
    }

    /// Handle an interval tick. Stale ticks are ignored.
    pub fn on_tick(&mut self, id: TimerId, timers: &mut TimerIds, fx: &mut Vec<Effect>) {
        if self.ping_timer != Some(id) {
            debug!(?id, "Ignoring stale heartbeat tick");
            return;
        }
        self.arm_ping(timers, fx);

        // Don't pile up pings
        if self.awaiting_pong {
            debug!("Pong still outstanding, skipping ping");
            return;
        }

        let now = Utc::now();
        self.last_ping = Some(now);
        self.awaiting_pong = true;
        fx.push(Effect::SendPing);

        let pong_id = timers.next();
        self.pong_timer = Some(pong_id);
        fx.push(Effect::ArmTimer {
            id: pong_id,
            kind: TimerKind::PongTimeout,
            after: self.pong_timeout,
        });
        debug!(time = %now, "Sent heartbeat ping");
    }

    /// Record a pong. Unsolicited pongs are ignored.
    pub fn on_pong(&mut self, fx: &mut Vec<Effect>) {
        if !self.awaiting_pong {
            debug!("Ignoring unsolicited pong");
            return;
        }
        self.awaiting_pong = false;
        if let Some(id) = self.pong_timer.take() {
            fx.push(Effect::CancelTimer(id));
        }

        let now = Utc::now();
        self.last_pong = Some(now);
        if let Some(ping_time) = self.last_ping {
            let rtt_ms = (now - ping_time).num_milliseconds();
            self.last_rtt_ms = Some(rtt_ms);
            debug!(rtt_ms, "Received pong");
        }
    }

    /// Handle the pong-timeout timer. Returns `true` if the peer is unresponsive.
    pub fn on_pong_timeout(&mut self, id: TimerId) -> bool {
        if self.pong_timer != Some(id) || !self.awaiting_pong {
            return false;
        }
        self.pong_timer = None;
        self.awaiting_pong = false;
        true
    }

    /// Get heartbeat statistics.
    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            last_ping: self.last_ping,
            last_pong: self.last_pong,
            last_rtt_ms: self.last_rtt_ms,
            awaiting_pong: self.awaiting_pong,
        }
    }

    fn arm_ping(&mut self, timers: &mut TimerIds, fx: &mut Vec<Effect>) {
        let id = timers.next();
        self.ping_timer = Some(id);
        fx.push(Effect::ArmTimer {
            id,
            kind: TimerKind::Ping,
            after: self.interval,
        });
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatStats {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub last_rtt_ms: Option<i64>,
    pub awaiting_pong: bool,
}
