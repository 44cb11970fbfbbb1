//! Per-connection frame pump shared by clients and server connections.
//!
//! One task per socket reads inbound frames, writes outbound commands and
//! reports lifecycle events. Events for one connection are therefore never
//! raised concurrently with each other.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use crate::lifecycle::Shutdown;
use crate::net::ConnectionId;

/// Close code reported when a close frame carries no status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
pub const ABNORMAL_REASON: &str = "Abnormal closure";

/// Command for the pump's writer side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Outbound path into one live connection.
///
/// Cloning is cheap; every clone feeds the same pump.
#[derive(Debug, Clone)]
pub struct ConnectionLink {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionLink {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a text frame. False once the pump has exited.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.tx.send(Outbound::Text(text.into())).is_ok()
    }

    /// Start the closing handshake.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Receiver of one connection's events, called from the pump task.
pub(crate) trait ConnectionEvents {
    fn on_message(&self, text: String);
    fn on_close(&self, code: u16, reason: String);
    fn on_error(&self, reason: String);
}

/// How long a locally started close waits for the peer's reply by default.
pub(crate) const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Pump settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PumpOptions {
    /// Keep-alive ping period; `None` disables pings.
    pub ping_interval: Option<Duration>,
    /// After we send a close frame, the socket is dropped if the peer has
    /// not answered within this period.
    pub close_timeout: Duration,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            ping_interval: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Drive `ws` until it closes, fails, or `shutdown` fires.
///
/// A close started through [`Outbound::Close`] ends the pump when the peer
/// replies, or with a 1006 close once `options.close_timeout` passes.
///
/// A shutdown sends a normal close frame and exits without raising events:
/// the owner is going away and nobody is left to observe them.
pub(crate) async fn run<S, E>(
    ws: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shutdown: &Shutdown,
    options: PumpOptions,
    events: &E,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    E: ConnectionEvents,
{
    let mut shutdown_rx = shutdown.subscribe();
    let (mut sink, mut stream) = ws.split();

    if shutdown.is_triggered() {
        let _ = sink.send(normal_close()).await;
        return;
    }

    let ping_enabled = options.ping_interval.is_some();
    let period = options.ping_interval.unwrap_or(Duration::from_secs(3600));
    let mut ping = tokio::time::interval_at(Instant::now() + period, period);
    let mut outbound_open = true;
    let mut close_deadline: Option<Instant> = None;
    // Placeholder target while no close is pending; the branch is disabled then.
    let idle_deadline = Instant::now() + Duration::from_secs(86_400);

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => events.on_message(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => {
                    events.on_message(String::from_utf8_lossy(&bytes).into_owned())
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    // Flushes the queued close reply.
                    let _ = sink.close().await;
                    events.on_close(code, reason);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) | None => {
                    events.on_close(CLOSE_ABNORMAL, ABNORMAL_REASON.to_string());
                    break;
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => break,
                Some(Err(e)) => {
                    events.on_error(e.to_string());
                    break;
                }
            },
            command = outbound.recv(), if outbound_open => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        events.on_error(e.to_string());
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        events.on_error(e.to_string());
                        break;
                    }
                    close_deadline.get_or_insert(Instant::now() + options.close_timeout);
                }
                None => outbound_open = false,
            },
            _ = tokio::time::sleep_until(close_deadline.unwrap_or(idle_deadline)), if close_deadline.is_some() => {
                tracing::debug!(timeout = ?options.close_timeout, "peer ignored close frame, dropping socket");
                events.on_close(CLOSE_ABNORMAL, ABNORMAL_REASON.to_string());
                break;
            }
            _ = ping.tick(), if ping_enabled => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    events.on_error(e.to_string());
                    break;
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = sink.send(normal_close()).await;
                break;
            }
        }
    }
}

fn normal_close() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }))
}
