//! In-memory transport for driving the client under paused tokio time.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evstream_ws::{
    ConnectionConfig, CredentialSource, EventStreamClient, Message, OutboundFrame, Transport,
    TransportEvent, TransportLink, TransportPeer, WsError, WsResult,
};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

/// A connection accepted by the mock server.
pub struct Accepted {
    pub url: Url,
    pub peer: TransportPeer,
    pub at: Instant,
}

impl Accepted {
    /// Push a text frame to the client.
    pub fn push(&self, text: &str) {
        self.peer
            .inbound
            .send(TransportEvent::Text(text.to_string()))
            .expect("client reader alive");
    }

    pub fn push_message(&self, msg: &Message) {
        self.push(&msg.to_json().expect("serialize"));
    }

    /// Close from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.peer.inbound.send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next frame written by the client.
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        self.peer.outbound.recv().await
    }

    /// Next text frame, decoded.
    pub async fn next_message(&mut self) -> Message {
        match self.next_frame().await {
            Some(OutboundFrame::Text(text)) => Message::from_json(&text).expect("valid frame"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    pub fn try_next_frame(&mut self) -> Option<OutboundFrame> {
        self.peer.outbound.try_recv().ok()
    }
}

/// Records every open attempt and hands accepted connections to the test.
pub struct MockTransport {
    fail: AtomicBool,
    open_delay: Mutex<Duration>,
    attempts: Mutex<Vec<Instant>>,
    accepted: mpsc::UnboundedSender<Accepted>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Accepted>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            fail: AtomicBool::new(false),
            open_delay: Mutex::new(Duration::ZERO),
            attempts: Mutex::new(Vec::new()),
            accepted: tx,
        });
        (transport, rx)
    }

    /// Refuse every subsequent open.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delay the handshake of subsequent opens.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

impl Transport for MockTransport {
    fn open(&self, url: Url) -> BoxFuture<'static, WsResult<TransportLink>> {
        self.attempts.lock().push(Instant::now());
        let fail = self.fail.load(Ordering::SeqCst);
        let delay = *self.open_delay.lock();
        let accepted = self.accepted.clone();

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(WsError::ConnectionFailed("connection refused".to_string()));
            }
            let (link, peer) = TransportLink::pair();
            let _ = accepted.send(Accepted {
                url,
                peer,
                at: Instant::now(),
            });
            Ok(link)
        })
    }
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        url: "wss://events.example.com/stream".to_string(),
        ..ConnectionConfig::default()
    }
}

pub fn client_with<C>(
    credentials: C,
) -> (
    EventStreamClient,
    Arc<MockTransport>,
    mpsc::UnboundedReceiver<Accepted>,
)
where
    C: CredentialSource + 'static,
{
    let (transport, accepted) = MockTransport::new();
    let client = EventStreamClient::with_transport(
        test_config(),
        Arc::new(credentials),
        transport.clone(),
    )
    .expect("client");
    (client, transport, accepted)
}

/// Let spawned tasks run without advancing the clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn millis_between(earlier: Instant, later: Instant) -> u64 {
    later.duration_since(earlier).as_millis() as u64
}
