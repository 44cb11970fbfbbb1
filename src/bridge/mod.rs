//! The bridge: one explicit context owning the runtime, the task queue and
//! every handle table.
//!
//! # Data Flow
//! ```text
//! caller (drain thread)           runtime workers
//!   create / configure  ────────►  sessions dial, accept, request
//!                                   │
//!                                   ▼
//!                                TaskQueue::push
//!                                   │
//!   Bridge::drain  ◄────────────────┘
//!     → resolve handle, re-check listeners
//!     → callback(&Bridge, params)
//!     → release single-shot handles
//! ```
//!
//! # Design Decisions
//! - Callbacks run only inside `drain`, on the caller's thread
//! - Handles are resolved at delivery; a released session makes delivery a no-op
//! - Teardown abandons pending tasks, stops every socket, then the runtime

mod dispatch;

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{Forward, Handle, HandleKind, HandleTable, JsonStore, Listener};
use crate::http::{HttpCall, HttpRequestSession};
use crate::queue::TaskQueue;
use crate::websocket::{MessageMode, WebSocketClientSession, WebSocketServerSession};

/// Which WebSocket callback slot to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsEvent {
    Message,
    Open,
    Close,
    Error,
}

/// Owner of all sessions and the single drain point for their events.
pub struct Bridge {
    config: BridgeConfig,
    runtime: Option<tokio::runtime::Runtime>,
    handle: tokio::runtime::Handle,
    queue: Arc<TaskQueue>,
    ws_clients: HandleTable<WebSocketClientSession>,
    ws_servers: HandleTable<WebSocketServerSession>,
    http_requests: HandleTable<HttpRequestSession>,
    json: JsonStore,
    draining: AtomicBool,
}

impl Bridge {
    /// Build the background runtime and empty handle tables.
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.runtime.worker_threads)
            .thread_name(config.runtime.thread_name.clone())
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        tracing::info!(
            worker_threads = config.runtime.worker_threads,
            thread_name = %config.runtime.thread_name,
            "Bridge started"
        );

        Ok(Self {
            config,
            runtime: Some(runtime),
            handle,
            queue: Arc::new(TaskQueue::new()),
            ws_clients: HandleTable::new(HandleKind::WsClient),
            ws_servers: HandleTable::new(HandleKind::WsServer),
            http_requests: HandleTable::new(HandleKind::HttpRequest),
            json: JsonStore::new(),
            draining: AtomicBool::new(false),
        })
    }

    pub fn with_defaults() -> BridgeResult<Self> {
        Self::new(BridgeConfig::default())
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Handle to the background runtime.
    pub fn runtime(&self) -> &tokio::runtime::Handle {
        &self.handle
    }

    /// Tasks waiting for the next drain.
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Live handles of one kind.
    pub fn handle_count(&self, kind: HandleKind) -> usize {
        match kind {
            HandleKind::WsClient => self.ws_clients.len(),
            HandleKind::WsServer => self.ws_servers.len(),
            HandleKind::HttpRequest => self.http_requests.len(),
            HandleKind::Json => self.json.len(),
        }
    }

    /// Whether `handle` still resolves.
    pub fn is_valid(&self, handle: Handle) -> bool {
        match handle.kind() {
            HandleKind::WsClient => self.ws_clients.contains(handle),
            HandleKind::WsServer => self.ws_servers.contains(handle),
            HandleKind::HttpRequest => self.http_requests.contains(handle),
            HandleKind::Json => self.json.value(handle).is_ok(),
        }
    }

    /// Release any handle. Sessions are dropped outside the table lock:
    /// servers stop synchronously, durable clients stop their socket.
    pub fn release(&self, handle: Handle) -> BridgeResult<()> {
        match handle.kind() {
            HandleKind::WsClient => self.ws_clients.release(handle).map(drop),
            HandleKind::WsServer => self.ws_servers.release(handle).map(drop),
            HandleKind::HttpRequest => self.http_requests.release(handle).map(drop),
            HandleKind::Json => self.json.release(handle),
        }
    }

    // HTTP

    pub fn http_create(&self, url: &str) -> BridgeResult<Handle> {
        let session = HttpRequestSession::new(url, &self.config.http)?;
        Ok(self.http_requests.insert(Arc::new(session)))
    }

    pub fn http(&self, request: Handle) -> BridgeResult<Arc<HttpRequestSession>> {
        self.http_requests.get(request)
    }

    /// Register the response callback, replacing any previous one.
    pub fn http_on_response(&self, request: Handle, callback: Listener) -> BridgeResult<()> {
        self.http(request)?.response_forward().set(callback);
        Ok(())
    }

    /// Serialize `document` into the request body.
    pub fn http_set_json_body(&self, request: Handle, document: Handle) -> BridgeResult<()> {
        let session = self.http(request)?;
        session.set_json_body(self.json.serialize(document)?);
        Ok(())
    }

    /// Submit the request. The callback receives
    /// `(request, body, status, body_len, value)` and the handle is released
    /// right after it returns.
    pub fn http_perform(&self, request: Handle, call: HttpCall, value: i64) -> BridgeResult<()> {
        let session = self.http(request)?;
        if session.is_submitted() {
            return Err(BridgeError::AlreadySubmitted(request));
        }
        let document = call
            .document()
            .map(|doc| self.json.serialize(doc))
            .transpose()?;
        let options = session.prepare(call, document);
        session.submit(request, options, value, &self.handle, Arc::clone(&self.queue))
    }

    // WebSocket client

    pub fn ws_client_create(&self, url: &str, mode: MessageMode) -> BridgeResult<Handle> {
        let session = WebSocketClientSession::new(url, mode)?;
        Ok(self.ws_clients.insert(Arc::new(session)))
    }

    pub fn ws_client(&self, client: Handle) -> BridgeResult<Arc<WebSocketClientSession>> {
        self.ws_clients.get(client)
    }

    pub fn ws_client_on(&self, client: Handle, event: WsEvent, callback: Listener) -> BridgeResult<()> {
        let session = self.ws_client(client)?;
        let forward = match event {
            WsEvent::Message => session.message_forward(),
            WsEvent::Open => session.open_forward(),
            WsEvent::Close => session.close_forward(),
            WsEvent::Error => session.error_forward(),
        };
        forward.set(callback);
        Ok(())
    }

    /// Start dialing. Reconnection is left to the caller.
    pub fn ws_client_connect(&self, client: Handle) -> BridgeResult<()> {
        let session = self.ws_client(client)?;
        session.connect(
            client,
            &self.handle,
            Arc::clone(&self.queue),
            &self.config.websocket.client,
        )
    }

    // WebSocket server

    pub fn ws_server_create(&self, host: &str, port: u16) -> Handle {
        let session = WebSocketServerSession::new(host, port, self.config.websocket.server.clone());
        self.ws_servers.insert(Arc::new(session))
    }

    pub fn ws_server(&self, server: Handle) -> BridgeResult<Arc<WebSocketServerSession>> {
        self.ws_servers.get(server)
    }

    pub fn ws_server_on(&self, server: Handle, event: WsEvent, callback: Listener) -> BridgeResult<()> {
        let session = self.ws_server(server)?;
        let forward: &Forward = match event {
            WsEvent::Message => session.message_forward(),
            WsEvent::Open => session.open_forward(),
            WsEvent::Close => session.close_forward(),
            WsEvent::Error => session.error_forward(),
        };
        forward.set(callback);
        Ok(())
    }

    /// Bind and start accepting. Returns the bound address.
    pub fn ws_server_start(&self, server: Handle) -> BridgeResult<SocketAddr> {
        self.ws_server(server)?
            .start(server, &self.handle, Arc::clone(&self.queue))
    }

    /// Stop the listener and all its connections; the handle stays valid.
    pub fn ws_server_stop(&self, server: Handle) -> BridgeResult<()> {
        self.ws_server(server)?.stop();
        Ok(())
    }

    // JSON documents

    pub fn json_parse(&self, text: &str) -> BridgeResult<Handle> {
        Ok(self.json.parse(text)?)
    }

    pub fn json_create(&self, value: Value) -> Handle {
        self.json.create(value)
    }

    pub fn json_value(&self, document: Handle) -> BridgeResult<Arc<Value>> {
        self.json.value(document)
    }

    pub fn json_serialize(&self, document: Handle) -> BridgeResult<String> {
        self.json.serialize(document)
    }

    /// Drop pending tasks, stop every session, then the runtime.
    /// Returns the number of tasks abandoned.
    pub fn shutdown(mut self) -> usize {
        self.teardown()
    }

    fn teardown(&mut self) -> usize {
        let Some(runtime) = self.runtime.take() else {
            return 0;
        };

        let mut abandoned = self.queue.discard();
        let servers = self.ws_servers.clear();
        let clients = self.ws_clients.clear();
        let requests = self.http_requests.clear();
        let documents = self.json.clear();
        tracing::debug!(
            servers = servers.len(),
            clients = clients.len(),
            requests = requests.len(),
            documents,
            "Releasing live handles"
        );
        drop(servers);
        drop(clients);
        drop(requests);

        let timeout = Duration::from_millis(self.config.runtime.shutdown_timeout_ms);
        if tokio::runtime::Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(timeout);
        }

        // Sockets may have reported in while stopping.
        abandoned += self.queue.discard();
        if abandoned > 0 {
            tracing::warn!(abandoned, "Abandoned undelivered tasks at shutdown");
        }
        tracing::info!("Bridge stopped");
        abandoned
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("pending_tasks", &self.queue.len())
            .field("ws_clients", &self.ws_clients.len())
            .field("ws_servers", &self.ws_servers.len())
            .field("http_requests", &self.http_requests.len())
            .field("json_documents", &self.json.len())
            .finish()
    }
}
