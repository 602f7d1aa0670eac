//! WebSocket connection manager.
//!
//! Drives the [`StateMachine`] on the tokio runtime: opens transports, runs
//! one reader task per connection, arms timers and broadcasts state changes.
//!
//! Every socket event, timer and public call funnels through a single
//! re-entrant lock around the machine, so transitions are serialized across
//! threads while observers may still call back into the manager (e.g.
//! `disconnect()` from a state handler). Subscriber dispatch runs outside
//! the lock.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use evstream_core::{ConnectionState, ConnectionStatus, Message};
use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::credential::CredentialSource;
use crate::dispatcher::{decode, panic_message, Dispatcher, Inbound};
use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatStats;
use crate::machine::{Effect, MachineConfig, StateMachine, TimerId, TimerKind};
use crate::reconnect::BackoffPolicy;
use crate::transport::{
    OutboundFrame, Transport, TransportEvent, TransportLink, CLOSE_ABNORMAL, CLOSE_NORMAL,
};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL. The credential is appended as `?token=`.
    pub url: String,
    /// Base delay for exponential backoff.
    pub min_reconnect_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub max_reconnect_delay_ms: u64,
    /// Upper bound of random jitter added to each delay (0 = none).
    pub reconnect_jitter_ms: u64,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Heartbeat interval.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub pong_timeout_ms: u64,
    /// Bound on the TCP, TLS and WebSocket handshake.
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            min_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30000,
            reconnect_jitter_ms: 0,
            max_reconnect_attempts: 0, // Infinite
            heartbeat_interval_ms: 30000,
            pong_timeout_ms: 10000,
            connect_timeout_ms: 10000,
        }
    }
}

impl ConnectionConfig {
    fn machine_config(&self) -> WsResult<MachineConfig> {
        let base_url =
            Url::parse(&self.url).map_err(|e| WsError::InvalidUrl(format!("{}: {e}", self.url)))?;
        if !matches!(base_url.scheme(), "ws" | "wss") {
            return Err(WsError::InvalidUrl(format!(
                "unsupported scheme: {}",
                base_url.scheme()
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(WsError::InvalidConfig(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.pong_timeout_ms == 0 {
            return Err(WsError::InvalidConfig(
                "pong_timeout_ms must be positive".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(WsError::InvalidConfig(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(MachineConfig {
            base_url,
            backoff: BackoffPolicy {
                min_delay_ms: self.min_reconnect_delay_ms,
                max_delay_ms: self.max_reconnect_delay_ms.max(self.min_reconnect_delay_ms),
                jitter_ms: self.reconnect_jitter_ms,
                max_attempts: self.max_reconnect_attempts,
            },
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            pong_timeout_ms: self.pong_timeout_ms,
        })
    }
}

/// Connection-state observer callback.
pub type StateHandler = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

/// Token returned by `on_state_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

/// WebSocket connection manager.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    core: ReentrantMutex<RefCell<Core>>,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    state_tx: watch::Sender<ConnectionStatus>,
}

/// Everything guarded by the lock.
struct Core {
    machine: StateMachine,
    link: Option<ActiveLink>,
    timers: HashMap<TimerId, CancellationToken>,
    observers: Vec<Observer>,
    next_observer: u64,
    /// Sequence number of the next queued notification.
    next_seq: u64,
    pending_notifications: VecDeque<(u64, ConnectionStatus)>,
    notifying: bool,
}

struct Observer {
    id: u64,
    /// Notifications queued before this were superseded by the status the
    /// observer received on registration.
    since_seq: u64,
    handler: StateHandler,
}

/// The transport currently owned by the machine.
struct ActiveLink {
    epoch: u64,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    reader: CancellationToken,
}

impl ActiveLink {
    fn close(self, code: u16, reason: String) {
        debug!(epoch = self.epoch, code, "Releasing transport");
        self.reader.cancel();
        let _ = self.outbound.send(OutboundFrame::Close { code, reason });
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        for (_, token) in self.timers.drain() {
            token.cancel();
        }
        if let Some(link) = self.link.take() {
            link.close(CLOSE_NORMAL, "Client dropped".to_string());
        }
    }
}

impl ConnectionManager {
    /// Create a new connection manager. Must be called within a tokio runtime.
    pub fn new(
        config: ConnectionConfig,
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
    ) -> WsResult<Self> {
        let machine = StateMachine::new(config.machine_config()?, credentials);
        let runtime = Handle::try_current().map_err(|_| WsError::NoRuntime)?;
        let (state_tx, _) = watch::channel(ConnectionStatus::default());

        Ok(Self {
            shared: Arc::new(Shared {
                core: ReentrantMutex::new(RefCell::new(Core {
                    machine,
                    link: None,
                    timers: HashMap::new(),
                    observers: Vec::new(),
                    next_observer: 0,
                    next_seq: 0,
                    pending_notifications: VecDeque::new(),
                    notifying: false,
                })),
                dispatcher,
                transport,
                runtime,
                state_tx,
            }),
        })
    }

    /// Start connecting. Idempotent while connecting or connected.
    pub fn connect(&self) {
        self.shared.run(|core| core.machine.connect());
    }

    /// Close the connection and suppress auto-reconnect. Idempotent.
    ///
    /// Heartbeat and reconnect timers are cancelled and the state is
    /// `disconnected` before this returns.
    pub fn disconnect(&self) {
        self.shared.run(|core| core.machine.disconnect());
    }

    /// Disconnect then connect immediately, bypassing backoff.
    pub fn reconnect(&self) {
        self.shared.run(|core| core.machine.reconnect());
    }

    /// Queue `msg` on the open connection. Returns `false` if not connected.
    pub fn send(&self, msg: &Message) -> bool {
        let guard = self.shared.core.lock();
        let core = guard.borrow();
        if core.machine.state() != ConnectionState::Connected {
            debug!(event_type = %msg.event_type, "Send skipped, not connected");
            return false;
        }
        let Some(link) = &core.link else {
            return false;
        };

        match msg.to_json() {
            Ok(text) => link.outbound.send(OutboundFrame::Text(text)).is_ok(),
            Err(e) => {
                warn!(?e, event_type = %msg.event_type, "Failed to serialize message");
                false
            }
        }
    }

    /// Get current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.core.lock().borrow().machine.status().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().borrow().machine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.core.lock().borrow().machine.reconnect_attempt()
    }

    /// Whether a backoff timer is waiting to reconnect.
    pub fn reconnect_pending(&self) -> bool {
        self.shared.core.lock().borrow().machine.reconnect_pending()
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.shared.core.lock().borrow().machine.heartbeat_stats()
    }

    /// Async view of the connection status.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.state_tx.subscribe()
    }

    /// Register a state observer. It is invoked immediately with the current
    /// status, then on every later transition, in order. Transitions still
    /// queued for delivery at registration time are not replayed to it.
    pub fn on_state_change<F>(&self, handler: F) -> ObserverHandle
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        let handler: StateHandler = Arc::new(handler);
        let guard = self.shared.core.lock();
        let (id, current) = {
            let mut core = guard.borrow_mut();
            core.next_observer += 1;
            let id = core.next_observer;
            let since_seq = core.next_seq;
            core.observers.push(Observer {
                id,
                since_seq,
                handler: Arc::clone(&handler),
            });
            (id, core.machine.status().clone())
        };
        notify_observer(&handler, &current);
        ObserverHandle(id)
    }

    /// Remove a state observer. Returns `false` if it was already removed.
    pub fn remove_state_observer(&self, handle: ObserverHandle) -> bool {
        let guard = self.shared.core.lock();
        let mut core = guard.borrow_mut();
        let before = core.observers.len();
        core.observers.retain(|o| o.id != handle.0);
        core.observers.len() != before
    }
}

impl Shared {
    /// Apply one machine input under the lock, then execute its effects.
    fn run<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&mut Core) -> Vec<Effect>,
    {
        let guard = self.core.lock();
        let effects = f(&mut guard.borrow_mut());
        self.apply(&guard, effects);
    }

    fn apply(self: &Arc<Self>, core: &RefCell<Core>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Open { epoch, url } => self.spawn_open(epoch, url),
                Effect::SendPing => {
                    let core = core.borrow();
                    if let Some(link) = &core.link {
                        match Message::ping().to_json() {
                            Ok(text) => {
                                let _ = link.outbound.send(OutboundFrame::Text(text));
                            }
                            Err(e) => warn!(?e, "Failed to serialize ping"),
                        }
                    }
                }
                Effect::Close { code, reason } => {
                    let link = core.borrow_mut().link.take();
                    if let Some(link) = link {
                        link.close(code, reason);
                    }
                }
                Effect::ArmTimer { id, kind, after } => {
                    let token = CancellationToken::new();
                    core.borrow_mut().timers.insert(id, token.clone());
                    self.spawn_timer(id, kind, after, token);
                }
                Effect::CancelTimer(id) => {
                    if let Some(token) = core.borrow_mut().timers.remove(&id) {
                        token.cancel();
                    }
                }
                Effect::Notify(status) => {
                    self.state_tx.send_replace(status.clone());
                    let mut core = core.borrow_mut();
                    let seq = core.next_seq;
                    core.next_seq += 1;
                    core.pending_notifications.push_back((seq, status));
                }
            }
        }
        self.flush_notifications(core);
    }

    /// Deliver queued notifications in transition order. A transition made
    /// from inside an observer is queued behind the one being delivered.
    fn flush_notifications(&self, core: &RefCell<Core>) {
        {
            let mut core = core.borrow_mut();
            if core.notifying {
                return;
            }
            core.notifying = true;
        }

        loop {
            let (status, observers) = {
                let mut core = core.borrow_mut();
                let Some((seq, status)) = core.pending_notifications.pop_front() else {
                    core.notifying = false;
                    return;
                };
                let observers: Vec<StateHandler> = core
                    .observers
                    .iter()
                    .filter(|o| o.since_seq <= seq)
                    .map(|o| Arc::clone(&o.handler))
                    .collect();
                (status, observers)
            };
            for observer in &observers {
                notify_observer(observer, &status);
            }
        }
    }

    fn spawn_open(self: &Arc<Self>, epoch: u64, url: Url) {
        let weak = Arc::downgrade(self);
        let transport = Arc::clone(&self.transport);

        self.runtime.spawn(async move {
            let result = transport.open(url).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(link) => shared.attach(epoch, link),
                Err(e) => {
                    error!(epoch, error = %e, "Failed to open transport");
                    shared.run(|core| core.machine.on_transport_failed(epoch, e.to_string()));
                }
            }
        });
    }

    /// Adopt a freshly opened transport if `epoch` is still current.
    fn attach(self: &Arc<Self>, epoch: u64, link: TransportLink) {
        self.run(|core| {
            let TransportLink { outbound, inbound } = link;
            if core.machine.epoch() != epoch
                || core.machine.state() != ConnectionState::Connecting
            {
                debug!(epoch, "Closing superseded transport");
                let _ = outbound.send(OutboundFrame::Close {
                    code: CLOSE_NORMAL,
                    reason: "Superseded".to_string(),
                });
                return Vec::new();
            }

            let reader = CancellationToken::new();
            core.link = Some(ActiveLink {
                epoch,
                outbound,
                reader: reader.clone(),
            });
            self.spawn_reader(epoch, inbound, reader);
            core.machine.on_opened(epoch)
        });
    }

    /// One reader per connection: frames are handled strictly in wire order.
    fn spawn_reader(
        self: &Arc<Self>,
        epoch: u64,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
        token: CancellationToken,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);

        self.runtime.spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    event = inbound.recv() => event,
                };
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                match event {
                    Some(TransportEvent::Text(text)) => shared.on_frame(epoch, &text),
                    Some(TransportEvent::Closed { code, reason }) => {
                        shared.run(|core| core.machine.on_closed(epoch, code, reason));
                        break;
                    }
                    None => {
                        shared.run(|core| {
                            core.machine.on_closed(
                                epoch,
                                CLOSE_ABNORMAL,
                                "Transport dropped".to_string(),
                            )
                        });
                        break;
                    }
                }
            }
            debug!(epoch, "Reader stopped");
        });
    }

    fn on_frame(self: &Arc<Self>, epoch: u64, text: &str) {
        match decode(text) {
            Err(e) => warn!(epoch, error = %e, "Dropping malformed frame"),
            Ok(Inbound::Pong) => self.run(|core| core.machine.on_pong(epoch)),
            Ok(Inbound::Event(msg)) => {
                if !self.core.lock().borrow().machine.is_live(epoch) {
                    debug!(epoch, event_type = %msg.event_type, "Dropping frame from stale connection");
                    return;
                }
                self.dispatcher.dispatch(&msg);
            }
        }
    }

    fn spawn_timer(
        self: &Arc<Self>,
        id: TimerId,
        kind: TimerKind,
        after: Duration,
        token: CancellationToken,
    ) {
        let weak = Arc::downgrade(self);

        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    if let Some(shared) = weak.upgrade() {
                        shared.run(|core| {
                            // Cancelled between wake-up and lock
                            if core.timers.remove(&id).is_none() {
                                return Vec::new();
                            }
                            core.machine.on_timer(id, kind)
                        });
                    }
                }
            }
        });
    }
}

fn notify_observer(observer: &StateHandler, status: &ConnectionStatus) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer(status))) {
        error!(
            state = %status.state,
            panic = %panic_message(&*panic),
            "State observer panicked"
        );
    }
}
