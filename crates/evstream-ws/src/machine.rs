//! Connection state machine.
//!
//! The machine is synchronous and owns every piece of mutable connection
//! state: the `ConnectionStatus`, the heartbeat monitor and the reconnect
//! scheduler. Each input returns a list of [`Effect`]s that the runtime
//! driver executes in order. Observer notifications are always the last
//! effects of a transition.
//!
//! Every open attempt gets a new `epoch`. Transport events and timers tagged
//! with an older epoch or an unknown timer ID are ignored, which makes late
//! callbacks racing a `disconnect()` no-ops.

use std::sync::Arc;
use std::time::Duration;

use evstream_core::{ConnectionError, ConnectionState, ConnectionStatus};
use tracing::{debug, info, warn};
use url::Url;

use crate::credential::CredentialSource;
use crate::heartbeat::{HeartbeatMonitor, HeartbeatStats};
use crate::reconnect::{BackoffPolicy, ReconnectScheduler};
use crate::transport::{is_clean_close, CLOSE_ABNORMAL, CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NORMAL};

/// Identifier of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// What an armed timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Heartbeat interval tick.
    Ping,
    /// Deadline for the outstanding pong.
    PongTimeout,
    /// Backoff delay before the next connect attempt.
    Reconnect,
}

/// Monotonic timer ID allocator.
#[derive(Debug, Default)]
pub struct TimerIds {
    next: u64,
}

impl TimerIds {
    pub fn next(&mut self) -> TimerId {
        self.next += 1;
        TimerId(self.next)
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a transport for `epoch`.
    Open { epoch: u64, url: Url },
    /// Send a heartbeat ping on the current transport.
    SendPing,
    /// Release the current transport, sending a close frame if it is still open.
    Close { code: u16, reason: String },
    /// Arm a one-shot timer.
    ArmTimer {
        id: TimerId,
        kind: TimerKind,
        after: Duration,
    },
    /// Cancel an armed timer.
    CancelTimer(TimerId),
    /// Broadcast a new status to observers.
    Notify(ConnectionStatus),
}

/// Machine configuration.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub base_url: Url,
    pub backoff: BackoffPolicy,
    pub heartbeat_interval_ms: u64,
    pub pong_timeout_ms: u64,
}

/// The single logical connection's lifecycle.
pub struct StateMachine {
    base_url: Url,
    credentials: Arc<dyn CredentialSource>,
    status: ConnectionStatus,
    epoch: u64,
    /// Set by `disconnect()`; suppresses automatic reconnects.
    manual_stop: bool,
    heartbeat: HeartbeatMonitor,
    reconnect: ReconnectScheduler,
    timers: TimerIds,
}

impl StateMachine {
    pub fn new(config: MachineConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            base_url: config.base_url,
            credentials,
            status: ConnectionStatus::default(),
            epoch: 0,
            manual_stop: false,
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval_ms, config.pong_timeout_ms),
            reconnect: ReconnectScheduler::new(config.backoff),
            timers: TimerIds::default(),
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect.attempt()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_pending()
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.heartbeat.stats()
    }

    /// Whether `epoch` is the live, open connection.
    pub fn is_live(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.status.state == ConnectionState::Connected
    }

    /// `disconnected | error -> connecting`. Idempotent while connecting or connected.
    pub fn connect(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if matches!(
            self.status.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            debug!(state = %self.status.state, "Connect ignored, already active");
            return fx;
        }

        self.manual_stop = false;
        // A manual connect supersedes any pending backoff
        self.reconnect.cancel(&mut fx);
        self.begin_attempt(&mut fx);
        fx
    }

    /// `any -> disconnected`. Suppresses auto-reconnect until the next `connect()`.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.manual_stop = true;
        self.reconnect.cancel(&mut fx);
        self.heartbeat.stop(&mut fx);

        if matches!(
            self.status.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            fx.push(Effect::Close {
                code: CLOSE_NORMAL,
                reason: "Client disconnect".to_string(),
            });
        }
        // Invalidate in-flight opens and transport events
        self.epoch += 1;

        self.transition(ConnectionState::Disconnected, None, &mut fx);
        fx
    }

    /// Manual retry: disconnect then connect, bypassing backoff.
    pub fn reconnect(&mut self) -> Vec<Effect> {
        info!("Manual reconnect requested");
        let mut fx = self.disconnect();
        fx.extend(self.connect());
        fx
    }

    /// Transport handshake completed. `connecting -> connected`.
    pub fn on_opened(&mut self, epoch: u64) -> Vec<Effect> {
        let mut fx = Vec::new();
        if epoch != self.epoch || self.status.state != ConnectionState::Connecting {
            debug!(epoch, current = self.epoch, "Ignoring stale open");
            return fx;
        }

        self.reconnect.reset();
        self.heartbeat.start(&mut self.timers, &mut fx);
        info!(epoch, "Event stream connected");
        self.transition(ConnectionState::Connected, None, &mut fx);
        fx
    }

    /// Transport closed. Clean codes yield `disconnected`, anything else `error`.
    pub fn on_closed(&mut self, epoch: u64, code: u16, reason: String) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.is_active(epoch) {
            debug!(epoch, code, "Ignoring stale close");
            return fx;
        }
        self.handle_close(code, reason, &mut fx);
        fx
    }

    /// Transport could not be opened or failed without a close code.
    pub fn on_transport_failed(&mut self, epoch: u64, reason: String) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.is_active(epoch) {
            debug!(epoch, "Ignoring stale transport failure");
            return fx;
        }

        warn!(epoch, %reason, "Transport failure");
        self.heartbeat.stop(&mut fx);
        fx.push(Effect::Close {
            code: CLOSE_ABNORMAL,
            reason: reason.clone(),
        });
        self.schedule_reconnect(&mut fx);
        self.transition(
            ConnectionState::Error,
            Some(ConnectionError::Transport(reason)),
            &mut fx,
        );
        fx
    }

    /// Pong received on connection `epoch`.
    pub fn on_pong(&mut self, epoch: u64) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.is_live(epoch) {
            self.heartbeat.on_pong(&mut fx);
        }
        fx
    }

    /// An armed timer fired.
    pub fn on_timer(&mut self, id: TimerId, kind: TimerKind) -> Vec<Effect> {
        let mut fx = Vec::new();
        match kind {
            TimerKind::Ping => {
                if self.status.state == ConnectionState::Connected {
                    self.heartbeat.on_tick(id, &mut self.timers, &mut fx);
                }
            }
            TimerKind::PongTimeout => {
                if self.status.state == ConnectionState::Connected
                    && self.heartbeat.on_pong_timeout(id)
                {
                    warn!(
                        timeout_ms = self.heartbeat.pong_timeout_ms(),
                        "Heartbeat timeout, forcing close"
                    );
                    self.handle_close(
                        CLOSE_HEARTBEAT_TIMEOUT,
                        "Heartbeat timeout".to_string(),
                        &mut fx,
                    );
                }
            }
            TimerKind::Reconnect => {
                if self.reconnect.on_due(id) {
                    if self.manual_stop
                        || matches!(
                            self.status.state,
                            ConnectionState::Connecting | ConnectionState::Connected
                        )
                    {
                        debug!("Reconnect timer fired while not needed");
                    } else {
                        info!(attempt = self.reconnect.attempt(), "Reconnect attempt");
                        self.begin_attempt(&mut fx);
                    }
                }
            }
        }
        fx
    }

    fn is_active(&self, epoch: u64) -> bool {
        epoch == self.epoch
            && matches!(
                self.status.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
    }

    fn begin_attempt(&mut self, fx: &mut Vec<Effect>) {
        // Polled fresh on every attempt; credentials may rotate during an outage
        let Some(token) = self.credentials.credential() else {
            warn!("No credential available, connect aborted");
            self.transition(
                ConnectionState::Error,
                Some(ConnectionError::NoCredential),
                fx,
            );
            return;
        };

        self.epoch += 1;
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("token", &token);

        info!(
            epoch = self.epoch,
            host = self.base_url.host_str().unwrap_or_default(),
            "Connecting to event stream"
        );
        fx.push(Effect::Open {
            epoch: self.epoch,
            url,
        });
        let error = self.status.error.clone();
        self.transition(ConnectionState::Connecting, error, fx);
    }

    /// Single path for every close of an active connection, forced or not.
    fn handle_close(&mut self, code: u16, reason: String, fx: &mut Vec<Effect>) {
        self.heartbeat.stop(fx);
        fx.push(Effect::Close {
            code,
            reason: reason.clone(),
        });

        let (state, error) = if code == CLOSE_HEARTBEAT_TIMEOUT {
            (
                ConnectionState::Error,
                Some(ConnectionError::HeartbeatTimeout {
                    timeout_ms: self.heartbeat.pong_timeout_ms(),
                }),
            )
        } else if is_clean_close(code) {
            info!(code, %reason, "Event stream closed cleanly");
            (ConnectionState::Disconnected, None)
        } else {
            warn!(code, %reason, "Event stream closed abnormally");
            (
                ConnectionState::Error,
                Some(ConnectionError::AbnormalClose { code, reason }),
            )
        };

        self.schedule_reconnect(fx);
        self.transition(state, error, fx);
    }

    fn schedule_reconnect(&mut self, fx: &mut Vec<Effect>) {
        if self.manual_stop {
            debug!("Auto-reconnect suppressed by disconnect");
            return;
        }
        self.reconnect.schedule(&mut self.timers, fx);
    }

    fn transition(
        &mut self,
        state: ConnectionState,
        error: Option<ConnectionError>,
        fx: &mut Vec<Effect>,
    ) {
        let next = ConnectionStatus::new(state, error);
        if next == self.status {
            return;
        }
        info!(from = %self.status.state, to = %next.state, "Connection state change");
        self.status = next.clone();
        fx.push(Effect::Notify(next));
    }
}
