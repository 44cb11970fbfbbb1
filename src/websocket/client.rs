//! WebSocket client sessions.
//!
//! A durable session dials its own socket and stops it when dropped. An
//! ephemeral session wraps a server-accepted connection for the length of
//! one message delivery and never touches the socket's lifetime.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use url::Url;

use crate::config::WsClientConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{Forward, Handle};
use crate::lifecycle::Shutdown;
use crate::net::Headers;
use crate::observability::metrics;
use crate::queue::{TaskQueue, WsClose, WsError, WsMessage, WsOpen};
use crate::websocket::pump::{self, ConnectionEvents, ConnectionLink, Outbound, PumpOptions};

/// How inbound text is handed to the message callback. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageMode {
    #[default]
    Text,
    /// Parse each message into a document handle at delivery time.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the pump task.
#[derive(Debug)]
struct ClientCore {
    message_forward: Forward,
    open_forward: Forward,
    close_forward: Forward,
    error_forward: Forward,
    state: AtomicU8,
    headers: Mutex<Headers>,
    close_reported: AtomicBool,
}

impl ClientCore {
    fn new(state: ReadyState, headers: Headers) -> Self {
        Self {
            message_forward: Forward::new(),
            open_forward: Forward::new(),
            close_forward: Forward::new(),
            error_forward: Forward::new(),
            state: AtomicU8::new(state as u8),
            headers: Mutex::new(headers),
            close_reported: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: ReadyState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Who owns the socket behind a session.
#[derive(Debug)]
enum SocketLink {
    Owned {
        tx: mpsc::UnboundedSender<Outbound>,
        shutdown: Shutdown,
    },
    Borrowed(ConnectionLink),
}

impl SocketLink {
    fn send(&self, outbound: Outbound) -> bool {
        match self {
            SocketLink::Owned { tx, .. } => tx.send(outbound).is_ok(),
            SocketLink::Borrowed(link) => match outbound {
                Outbound::Text(text) => link.send(text),
                Outbound::Close { code, reason } => link.close(code, reason),
            },
        }
    }
}

/// One WebSocket client connection.
#[derive(Debug)]
pub struct WebSocketClientSession {
    url: Option<Url>,
    mode: MessageMode,
    owns_socket: bool,
    extra_headers: Mutex<Headers>,
    link: Mutex<Option<SocketLink>>,
    core: Arc<ClientCore>,
}

impl WebSocketClientSession {
    /// Durable client for `url` (`ws://` or `wss://`). Nothing is dialed yet.
    pub fn new(url: &str, mode: MessageMode) -> BridgeResult<Self> {
        let parsed = Url::parse(url).map_err(|source| BridgeError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(BridgeError::UnsupportedScheme(parsed.scheme().to_string()));
        }
        Ok(Self {
            url: Some(parsed),
            mode,
            owns_socket: true,
            extra_headers: Mutex::new(Headers::new()),
            link: Mutex::new(None),
            core: Arc::new(ClientCore::new(ReadyState::Connecting, Headers::new())),
        })
    }

    /// Wrap a server-accepted connection. Starts out open.
    pub fn ephemeral(link: ConnectionLink, headers: Headers) -> Self {
        Self {
            url: None,
            mode: MessageMode::Text,
            owns_socket: false,
            extra_headers: Mutex::new(Headers::new()),
            link: Mutex::new(Some(SocketLink::Borrowed(link))),
            core: Arc::new(ClientCore::new(ReadyState::Open, headers)),
        }
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn mode(&self) -> MessageMode {
        self.mode
    }

    /// True for caller-owned sessions that dial and stop their own socket.
    pub fn is_durable(&self) -> bool {
        self.owns_socket
    }

    pub fn ready_state(&self) -> ReadyState {
        self.core.state()
    }

    pub fn is_connected(&self) -> bool {
        if self.ready_state() != ReadyState::Open {
            return false;
        }
        match lock(&self.link).as_ref() {
            Some(SocketLink::Borrowed(link)) => link.is_open(),
            Some(SocketLink::Owned { tx, .. }) => !tx.is_closed(),
            None => false,
        }
    }

    /// Extra header sent with the opening handshake.
    pub fn add_header(&self, name: &str, value: &str) -> BridgeResult<()> {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| BridgeError::InvalidHeader(name.to_string()))?;
        HeaderValue::from_str(value).map_err(|_| BridgeError::InvalidHeader(name.to_string()))?;
        lock(&self.extra_headers).insert(name, value);
        Ok(())
    }

    /// Headers from the handshake (server response for durable clients,
    /// client request for ephemeral wrappers).
    pub fn headers(&self) -> Headers {
        lock(&self.core.headers).clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        lock(&self.core.headers).get(name).map(str::to_string)
    }

    /// Queue a text frame. False unless the connection is open.
    pub fn send(&self, text: impl Into<String>) -> bool {
        if self.ready_state() != ReadyState::Open {
            return false;
        }
        lock(&self.link)
            .as_ref()
            .is_some_and(|link| link.send(Outbound::Text(text.into())))
    }

    /// Begin the closing handshake; the Close event follows the peer's reply.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        if self.ready_state() != ReadyState::Open {
            return false;
        }
        let sent = lock(&self.link).as_ref().is_some_and(|link| {
            link.send(Outbound::Close {
                code,
                reason: reason.into(),
            })
        });
        if sent && self.owns_socket {
            self.core.set_state(ReadyState::Closing);
        }
        sent
    }

    pub fn message_forward(&self) -> &Forward {
        &self.core.message_forward
    }

    pub fn open_forward(&self) -> &Forward {
        &self.core.open_forward
    }

    pub fn close_forward(&self) -> &Forward {
        &self.core.close_forward
    }

    pub fn error_forward(&self) -> &Forward {
        &self.core.error_forward
    }

    /// Start dialing on the runtime. Events are pushed under `handle`.
    pub(crate) fn connect(
        &self,
        handle: Handle,
        runtime: &tokio::runtime::Handle,
        queue: Arc<TaskQueue>,
        config: &WsClientConfig,
    ) -> BridgeResult<()> {
        let url = match (&self.url, self.owns_socket) {
            (Some(url), true) => url,
            _ => return Err(BridgeError::NotOwned(handle)),
        };

        let mut link = lock(&self.link);
        if link.is_some() {
            return Err(BridgeError::AlreadyConnected(handle));
        }

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::InvalidRequest(e.to_string()))?;
        for (key, value) in lock(&self.extra_headers).iter() {
            let header_name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| BridgeError::InvalidHeader(key.to_string()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| BridgeError::InvalidHeader(key.to_string()))?;
            request.headers_mut().insert(header_name, header_value);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Shutdown::new();
        *link = Some(SocketLink::Owned {
            tx,
            shutdown: shutdown.clone(),
        });
        self.core.set_state(ReadyState::Connecting);

        let events = ClientEvents {
            client: handle,
            core: Arc::clone(&self.core),
            queue,
        };
        let handshake_timeout = Duration::from_secs(config.handshake_timeout_secs);
        let pump_options = PumpOptions {
            close_timeout: Duration::from_millis(config.close_timeout_ms),
            ..PumpOptions::default()
        };
        let target = url.to_string();

        runtime.spawn(async move {
            tracing::debug!(client = %handle, url = %target, "Connecting WebSocket");
            let connected = tokio::select! {
                result = tokio::time::timeout(handshake_timeout, connect_async(request)) => result,
                _ = wait_triggered(&shutdown) => return,
            };
            match connected {
                Ok(Ok((ws, response))) => {
                    metrics::record_ws_connection_opened("client");
                    events.opened(Headers::from_pairs(response.headers().iter()));
                    pump::run(ws, rx, &shutdown, pump_options, &events).await;
                    events.core.set_state(ReadyState::Closed);
                    metrics::record_ws_connection_closed("client");
                }
                Ok(Err(e)) => {
                    tracing::warn!(client = %handle, url = %target, error = %e, "WebSocket connect failed");
                    events.core.set_state(ReadyState::Closed);
                    events.on_error(e.to_string());
                }
                Err(_) => {
                    tracing::warn!(client = %handle, url = %target, "WebSocket handshake timed out");
                    events.core.set_state(ReadyState::Closed);
                    events.on_error("Handshake timed out".to_string());
                }
            }
        });
        Ok(())
    }
}

async fn wait_triggered(shutdown: &Shutdown) {
    let mut rx = shutdown.subscribe();
    if shutdown.is_triggered() {
        return;
    }
    let _ = rx.recv().await;
}

impl Drop for WebSocketClientSession {
    fn drop(&mut self) {
        let link = self
            .link
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(SocketLink::Owned { shutdown, .. }) = link {
            shutdown.trigger();
        }
    }
}

/// Pushes a durable client's events onto the queue.
struct ClientEvents {
    client: Handle,
    core: Arc<ClientCore>,
    queue: Arc<TaskQueue>,
}

impl ClientEvents {
    fn opened(&self, headers: Headers) {
        *lock(&self.core.headers) = headers.clone();
        self.core.set_state(ReadyState::Open);
        if self.core.open_forward.has_listeners() {
            self.queue.push(WsOpen {
                client: self.client,
                headers,
            });
        }
    }
}

impl ConnectionEvents for ClientEvents {
    fn on_message(&self, text: String) {
        if self.core.message_forward.has_listeners() {
            self.queue.push(WsMessage {
                client: self.client,
                text,
            });
        }
    }

    fn on_close(&self, code: u16, reason: String) {
        self.core.set_state(ReadyState::Closed);
        if self.core.close_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(client = %self.client, code, reason = %reason, "WebSocket closed");
        if self.core.close_forward.has_listeners() {
            self.queue.push(WsClose {
                client: self.client,
                code,
                reason,
            });
        }
    }

    fn on_error(&self, reason: String) {
        if self.core.error_forward.has_listeners() {
            self.queue.push(WsError {
                client: self.client,
                reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ConnectionId;

    #[test]
    fn test_rejects_non_websocket_scheme() {
        let err = WebSocketClientSession::new("http://localhost/", MessageMode::Text).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedScheme(ref s) if s == "http"));
        assert!(WebSocketClientSession::new("::", MessageMode::Text).is_err());
    }

    #[test]
    fn test_durable_starts_connecting() {
        let client = WebSocketClientSession::new("ws://127.0.0.1:1/", MessageMode::Json).unwrap();
        assert!(client.is_durable());
        assert_eq!(client.mode(), MessageMode::Json);
        assert_eq!(client.ready_state(), ReadyState::Connecting);
        assert!(!client.is_connected());
        assert!(!client.send("early"));
    }

    #[test]
    fn test_ephemeral_is_open_and_borrows_link() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = ConnectionLink::new(ConnectionId::new(), tx);
        let mut headers = Headers::new();
        headers.insert("X-Token", "abc");

        let client = WebSocketClientSession::ephemeral(link.clone(), headers);
        assert!(!client.is_durable());
        assert_eq!(client.ready_state(), ReadyState::Open);
        assert!(client.is_connected());
        assert_eq!(client.header("x-token").as_deref(), Some("abc"));
        assert!(client.send("reply"));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("reply".into()));

        drop(client);
        // The wrapped connection outlives the wrapper.
        assert!(link.send("still here"));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("still here".into()));
    }

    #[test]
    fn test_ephemeral_cannot_connect() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = WebSocketClientSession::ephemeral(
            ConnectionLink::new(ConnectionId::new(), tx),
            Headers::new(),
        );
        let handle = crate::host::HandleTable::<()>::new(crate::host::HandleKind::WsClient)
            .insert(Arc::new(()));
        let err = client
            .connect(handle, rt.handle(), Arc::new(TaskQueue::new()), &WsClientConfig::default())
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotOwned(_)));
    }

    #[test]
    fn test_add_header_validation() {
        let client = WebSocketClientSession::new("wss://example.com/feed", MessageMode::Text).unwrap();
        assert!(client.add_header("Authorization", "Bearer x").is_ok());
        assert!(client.add_header("bad name", "x").is_err());
    }
}
