//! Full-duplex transport abstraction.
//!
//! The connection state machine only sees a [`TransportLink`]: a pair of
//! channels carrying text frames and close notifications. The production
//! implementation pumps a tokio-tungstenite stream; tests plug in an
//! in-memory transport.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message as WsFrame, MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, error, warn};
use url::Url;

use crate::error::{WsError, WsResult};

/// Graceful close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (server restart, page unload).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code used when the pong timeout fires.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// Whether a close code counts as a clean, negotiated shutdown.
pub fn is_clean_close(code: u16) -> bool {
    matches!(code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
}

/// Event delivered from the transport to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Text(String),
    /// The connection ended. No further events follow.
    Closed { code: u16, reason: String },
}

/// Frame queued by the client for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Plain text frame.
    Text(String),
    /// Close the connection with the given code.
    Close { code: u16, reason: String },
}

/// Client end of an open connection.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Transport end of an open connection.
#[derive(Debug)]
pub struct TransportPeer {
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl TransportLink {
    /// Create a connected link/peer channel pair.
    pub fn pair() -> (TransportLink, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            TransportLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            TransportPeer {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }
}

/// Opens connections for the state machine.
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `url`. Resolves once the handshake completes.
    fn open(&self, url: Url) -> BoxFuture<'static, WsResult<TransportLink>>;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone, Copy)]
pub struct TungsteniteTransport {
    handshake_timeout: Duration,
}

impl TungsteniteTransport {
    /// A stalled handshake fails with [`WsError::ConnectionFailed`] after
    /// `handshake_timeout`.
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, url: Url) -> BoxFuture<'static, WsResult<TransportLink>> {
        let handshake_timeout = self.handshake_timeout;
        Box::pin(async move {
            let request = url.to_string();
            // TCP_NODELAY for lower latency
            let handshake = connect_async_tls_with_config(request, None, true, None);
            let (ws_stream, _response) = tokio::time::timeout(handshake_timeout, handshake)
                .await
                .map_err(|_| {
                    WsError::ConnectionFailed(format!(
                        "handshake timed out after {}ms",
                        handshake_timeout.as_millis()
                    ))
                })??;

            let (link, peer) = TransportLink::pair();
            tokio::spawn(pump(ws_stream, peer));
            Ok(link)
        })
    }
}

/// Move frames between the socket and the link until either side closes.
async fn pump(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, mut peer: TransportPeer) {
    let (mut write, mut read) = stream.split();

    let closed = loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsFrame::Text(text))) => {
                        if peer.inbound.send(TransportEvent::Text(text)).is_err() {
                            debug!("Link receiver dropped, closing socket");
                            let _ = write.send(WsFrame::Close(None)).await;
                            return;
                        }
                    }
                    Some(Ok(WsFrame::Ping(data))) => {
                        debug!("Received protocol ping, sending pong");
                        if let Err(e) = write.send(WsFrame::Pong(data)).await {
                            break (CLOSE_ABNORMAL, e.to_string());
                        }
                    }
                    Some(Ok(WsFrame::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((CLOSE_NORMAL, "Normal close".to_string()));
                        warn!(code, %reason, "WebSocket closed by server");
                        break (code, reason);
                    }
                    Some(Ok(WsFrame::Binary(data))) => {
                        debug!(len = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(?e, "WebSocket read error");
                        break (CLOSE_ABNORMAL, e.to_string());
                    }
                    None => {
                        warn!("WebSocket stream ended");
                        break (CLOSE_ABNORMAL, "Stream ended".to_string());
                    }
                }
            }

            outbound = peer.outbound.recv() => {
                match outbound {
                    Some(OutboundFrame::Text(text)) => {
                        if let Err(e) = write.send(WsFrame::Text(text)).await {
                            error!(?e, "WebSocket write error");
                            break (CLOSE_ABNORMAL, e.to_string());
                        }
                    }
                    Some(OutboundFrame::Close { code, reason }) => {
                        debug!(code, %reason, "Sending close frame");
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = write.send(WsFrame::Close(Some(frame))).await {
                            warn!(?e, "Failed to send close frame");
                        }
                        return;
                    }
                    None => {
                        let _ = write.send(WsFrame::Close(None)).await;
                        return;
                    }
                }
            }
        }
    };

    let (code, reason) = closed;
    let _ = peer.inbound.send(TransportEvent::Closed { code, reason });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_close_codes() {
        assert!(is_clean_close(CLOSE_NORMAL));
        assert!(is_clean_close(CLOSE_GOING_AWAY));
        assert!(!is_clean_close(CLOSE_ABNORMAL));
        assert!(!is_clean_close(CLOSE_HEARTBEAT_TIMEOUT));
        assert!(!is_clean_close(1011));
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        // Accepts TCP but never answers the upgrade request
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let transport = TungsteniteTransport::new(Duration::from_millis(200));
        let url = Url::parse(&format!("ws://{addr}/stream")).unwrap();
        let result = transport.open(url).await;

        assert!(matches!(result, Err(WsError::ConnectionFailed(_))));
        server.abort();
    }

    #[tokio::test]
    async fn test_link_pair_wiring() {
        let (mut link, mut peer) = TransportLink::pair();

        link.outbound
            .send(OutboundFrame::Text("hello".to_string()))
            .unwrap();
        assert_eq!(
            peer.outbound.recv().await,
            Some(OutboundFrame::Text("hello".to_string()))
        );

        peer.inbound
            .send(TransportEvent::Closed {
                code: CLOSE_NORMAL,
                reason: String::new(),
            })
            .unwrap();
        assert!(matches!(
            link.inbound.recv().await,
            Some(TransportEvent::Closed { code: 1000, .. })
        ));
    }
}
