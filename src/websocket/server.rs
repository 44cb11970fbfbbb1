//! WebSocket server sessions.
//!
//! # Responsibilities
//! - Bind the listener and accept connections (bounded, see `net::Listener`)
//! - Capture each connection's handshake headers in the header registry
//! - Pump every accepted connection and push server-scoped events
//! - Broadcast, targeted send and forced disconnect by connection id
//! - Stop synchronously: listener and every live connection
//!
//! # Design Decisions
//! - The header registry is one `Mutex<HashMap>`: insert on open, remove on
//!   close and on error, lookup at message delivery
//! - Live connections sit in a `DashMap`; administrative sends copy the
//!   links out first and write outside any shard lock
//! - Stopping a server raises no events for its connections

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::config::WsServerConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{Forward, Handle};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionId, ConnectionPermit, ConnectionTracker, Headers, Listener, ListenerError};
use crate::observability::metrics;
use crate::queue::{TaskQueue, WsServerClose, WsServerError, WsServerMessage, WsServerOpen};
use crate::websocket::pump::{self, ConnectionEvents, ConnectionLink, PumpOptions};
use crate::websocket::PeerInfo;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the accept loop and connection tasks.
#[derive(Debug, Default)]
struct ServerCore {
    message_forward: Forward,
    open_forward: Forward,
    close_forward: Forward,
    error_forward: Forward,
    header_registry: Mutex<HashMap<ConnectionId, Headers>>,
    connections: DashMap<ConnectionId, ConnectionLink>,
}

/// Handles kept while the listener runs.
struct Running {
    accept_task: JoinHandle<()>,
    runtime: tokio::runtime::Handle,
    local_addr: SocketAddr,
}

/// A listening WebSocket server and its accepted connections.
pub struct WebSocketServerSession {
    host: String,
    port: u16,
    config: WsServerConfig,
    core: Arc<ServerCore>,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    running: Mutex<Option<Running>>,
}

impl WebSocketServerSession {
    /// Server for `host:port`; the host literal picks IPv4 or IPv6.
    pub fn new(host: impl Into<String>, port: u16, config: WsServerConfig) -> Self {
        Self {
            host: host.into(),
            port,
            config,
            core: Arc::new(ServerCore::default()),
            shutdown: Shutdown::new(),
            tracker: ConnectionTracker::new(),
            running: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bound address once started (resolves port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.running).as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some() && !self.shutdown.is_triggered()
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

    /// Bind and start accepting. Events are pushed under `handle`.
    pub(crate) fn start(
        &self,
        handle: Handle,
        runtime: &tokio::runtime::Handle,
        queue: Arc<TaskQueue>,
    ) -> BridgeResult<SocketAddr> {
        let mut running = lock(&self.running);
        if running.is_some() || self.shutdown.is_triggered() {
            return Err(BridgeError::AlreadyStarted(handle));
        }

        let listener = {
            let _enter = runtime.enter();
            Listener::bind_blocking(&self.host, self.port, self.config.max_connections)
        }
        .map_err(|e| {
            let address = format!("{}:{}", self.host, self.port);
            match e {
                ListenerError::Bind(source) => BridgeError::Bind { address, source },
                other => BridgeError::Bind {
                    address,
                    source: std::io::Error::other(other.to_string()),
                },
            }
        })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(server = %handle, address = %local_addr, "WebSocket server listening");

        let context = AcceptContext {
            server: handle,
            core: Arc::clone(&self.core),
            queue,
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
            handshake_timeout: Duration::from_secs(self.config.handshake_timeout_secs),
            pump: PumpOptions {
                ping_interval: (self.config.ping_interval_secs > 0)
                    .then(|| Duration::from_secs(self.config.ping_interval_secs)),
                close_timeout: Duration::from_millis(self.config.close_timeout_ms),
            },
        };
        let accept_task = runtime.spawn(accept_loop(listener, context));

        *running = Some(Running {
            accept_task,
            runtime: runtime.clone(),
            local_addr,
        });
        Ok(local_addr)
    }

    /// Send `text` to every connection open right now. Returns how many
    /// connections accepted the frame.
    pub fn broadcast(&self, text: &str) -> usize {
        let links: Vec<ConnectionLink> = self
            .core
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        links.iter().filter(|link| link.send(text)).count()
    }

    /// Send to one connection. False if the id is unknown.
    pub fn send_to(&self, id: ConnectionId, text: &str) -> bool {
        self.link(id).is_some_and(|link| link.send(text))
    }

    /// Close one connection with a normal close frame. False if unknown.
    ///
    /// A client that does not answer within `close_timeout_ms` is dropped.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.link(id).is_some_and(|link| link.close(1000, ""))
    }

    fn link(&self, id: ConnectionId) -> Option<ConnectionLink> {
        self.core.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Ids of the currently open connections, ascending.
    pub fn client_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.core.connections.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn connection_count(&self) -> usize {
        self.core.connections.len()
    }

    /// Handshake headers registered for `id`.
    pub fn connection_headers(&self, id: ConnectionId) -> Option<Headers> {
        lock(&self.core.header_registry).get(&id).cloned()
    }

    /// Stop the listener and every connection, waiting up to the configured
    /// stop timeout. Idempotent.
    pub fn stop(&self) {
        self.shutdown.trigger();
        let Some(Running {
            accept_task,
            runtime,
            local_addr,
        }) = lock(&self.running).take()
        else {
            return;
        };

        let timeout = Duration::from_millis(self.config.stop_timeout_ms);
        // Blocking inside a runtime worker would panic; there the tasks
        // still exit on the shutdown signal, just unawaited.
        if tokio::runtime::Handle::try_current().is_err() {
            let tracker = self.tracker.clone();
            let drained = runtime.block_on(async move {
                let _ = tokio::time::timeout(timeout, accept_task).await;
                tracker.wait_idle(timeout).await
            });
            if !drained {
                tracing::warn!(
                    active = self.tracker.active_count(),
                    "WebSocket server stopped with connections still closing"
                );
            }
        }

        self.core.connections.clear();
        lock(&self.core.header_registry).clear();
        tracing::info!(address = %local_addr, "WebSocket server stopped");
    }
}

impl Drop for WebSocketServerSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WebSocketServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServerSession")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connections", &self.core.connections.len())
            .finish()
    }
}

struct AcceptContext {
    server: Handle,
    core: Arc<ServerCore>,
    queue: Arc<TaskQueue>,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
    handshake_timeout: Duration,
    pump: PumpOptions,
}

async fn accept_loop(listener: Listener, context: AcceptContext) {
    let context = Arc::new(context);
    let mut shutdown_rx = context.shutdown.subscribe();
    if context.shutdown.is_triggered() {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr, permit)) => {
                    tokio::spawn(serve_connection(Arc::clone(&context), stream, addr, permit));
                }
                Err(ListenerError::Closed) => break,
                Err(e) => tracing::warn!(error = %e, "Accept failed"),
            },
        }
    }
    tracing::debug!(server = %context.server, "Accept loop exited");
}

async fn serve_connection(
    context: Arc<AcceptContext>,
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    _permit: ConnectionPermit,
) {
    let guard = context.tracker.track();
    let peer = PeerInfo::new(guard.id(), addr);

    let mut captured = Headers::new();
    let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        captured = Headers::from_pairs(request.headers().iter());
        Ok(response)
    };
    let ws = match tokio::time::timeout(context.handshake_timeout, accept_hdr_async(stream, capture)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %peer.connection_id, error = %e, "WebSocket handshake failed");
            ServerEvents::new(&context, peer, None).on_error(e.to_string());
            return;
        }
        Err(_) => {
            tracing::debug!(connection_id = %peer.connection_id, "WebSocket handshake timed out");
            ServerEvents::new(&context, peer, None).on_error("Handshake timed out".to_string());
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let link = ConnectionLink::new(peer.connection_id, tx);
    lock(&context.core.header_registry).insert(peer.connection_id, captured);
    context.core.connections.insert(peer.connection_id, link.clone());
    metrics::record_ws_connection_opened("server");
    tracing::debug!(
        connection_id = %peer.connection_id,
        remote = %peer.remote_address,
        "WebSocket connection opened"
    );

    let events = ServerEvents::new(&context, peer.clone(), Some(link));
    events.opened();
    pump::run(ws, rx, &context.shutdown, context.pump, &events).await;

    context.core.connections.remove(&peer.connection_id);
    metrics::record_ws_connection_closed("server");
    drop(guard);
}

/// Pushes one server connection's events onto the queue.
struct ServerEvents<'a> {
    context: &'a AcceptContext,
    peer: PeerInfo,
    link: Option<ConnectionLink>,
}

impl<'a> ServerEvents<'a> {
    fn new(context: &'a AcceptContext, peer: PeerInfo, link: Option<ConnectionLink>) -> Self {
        Self { context, peer, link }
    }

    fn forget_headers(&self) {
        lock(&self.context.core.header_registry).remove(&self.peer.connection_id);
    }

    fn opened(&self) {
        if self.context.core.open_forward.has_listeners() {
            self.context.queue.push(WsServerOpen {
                server: self.context.server,
                peer: self.peer.clone(),
            });
        }
    }
}

impl ConnectionEvents for ServerEvents<'_> {
    fn on_message(&self, text: String) {
        let Some(link) = &self.link else { return };
        if self.context.core.message_forward.has_listeners() {
            self.context.queue.push(WsServerMessage {
                server: self.context.server,
                peer: self.peer.clone(),
                text,
                link: link.clone(),
            });
        }
    }

    fn on_close(&self, code: u16, reason: String) {
        self.forget_headers();
        tracing::debug!(connection_id = %self.peer.connection_id, code, "WebSocket connection closed");
        if self.context.core.close_forward.has_listeners() {
            self.context.queue.push(WsServerClose {
                server: self.context.server,
                peer: self.peer.clone(),
                code,
                reason,
            });
        }
    }

    fn on_error(&self, reason: String) {
        self.forget_headers();
        if self.context.core.error_forward.has_listeners() {
            self.context.queue.push(WsServerError {
                server: self.context.server,
                peer: self.peer.clone(),
                reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HandleKind, HandleTable};

    fn server_handle() -> Handle {
        HandleTable::<()>::new(HandleKind::WsServer).insert(Arc::new(()))
    }

    #[test]
    fn test_start_twice_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = WebSocketServerSession::new("127.0.0.1", 0, WsServerConfig::default());
        let handle = server_handle();
        let queue = Arc::new(TaskQueue::new());

        let addr = server.start(handle, rt.handle(), Arc::clone(&queue)).unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(server.is_running());
        assert!(matches!(
            server.start(handle, rt.handle(), queue),
            Err(BridgeError::AlreadyStarted(_))
        ));

        server.stop();
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_bind_conflict_is_config_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let first = WebSocketServerSession::new("127.0.0.1", 0, WsServerConfig::default());
        let addr = first
            .start(server_handle(), rt.handle(), Arc::new(TaskQueue::new()))
            .unwrap();

        let second = WebSocketServerSession::new("127.0.0.1", addr.port(), WsServerConfig::default());
        let err = second
            .start(server_handle(), rt.handle(), Arc::new(TaskQueue::new()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Bind { .. }));
    }

    #[test]
    fn test_unknown_connection() {
        let server = WebSocketServerSession::new("127.0.0.1", 0, WsServerConfig::default());
        let id = ConnectionId::new();
        assert!(!server.send_to(id, "x"));
        assert!(!server.disconnect(id));
        assert!(server.connection_headers(id).is_none());
        assert_eq!(server.broadcast("x"), 0);
        assert!(server.client_ids().is_empty());
    }
}
