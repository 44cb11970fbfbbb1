//! Completion tasks: one finished asynchronous event awaiting delivery.
//!
//! Every variant owns a snapshot of the event taken on the background thread
//! and names its session by handle only. Delivery resolves the handle again
//! on the drain thread and does nothing if the session is gone.

use crate::host::Handle;
use crate::net::Headers;
use crate::websocket::{ConnectionLink, PeerInfo};

/// Response of a single HTTP request.
#[derive(Debug, Clone)]
pub struct HttpCompletion {
    pub request: Handle,
    pub status: u16,
    pub body: String,
    /// Opaque value supplied by the caller at submit time.
    pub value: i64,
}

/// Text frame received by a durable client.
#[derive(Debug, Clone)]
pub struct WsMessage {
    pub client: Handle,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct WsOpen {
    pub client: Handle,
    pub headers: Headers,
}

#[derive(Debug, Clone)]
pub struct WsClose {
    pub client: Handle,
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct WsError {
    pub client: Handle,
    pub reason: String,
}

/// Text frame received on a server-accepted connection.
#[derive(Debug, Clone)]
pub struct WsServerMessage {
    pub server: Handle,
    pub peer: PeerInfo,
    pub text: String,
    /// Outbound path to the connection, wrapped into an ephemeral client at delivery.
    pub link: ConnectionLink,
}

#[derive(Debug, Clone)]
pub struct WsServerOpen {
    pub server: Handle,
    pub peer: PeerInfo,
}

#[derive(Debug, Clone)]
pub struct WsServerClose {
    pub server: Handle,
    pub peer: PeerInfo,
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct WsServerError {
    pub server: Handle,
    pub peer: PeerInfo,
    pub reason: String,
}

/// Closed set of deliverable events.
#[derive(Debug, Clone)]
pub enum CompletionTask {
    HttpCompletion(HttpCompletion),
    WsMessage(WsMessage),
    WsOpen(WsOpen),
    WsClose(WsClose),
    WsError(WsError),
    WsServerMessage(WsServerMessage),
    WsServerOpen(WsServerOpen),
    WsServerClose(WsServerClose),
    WsServerError(WsServerError),
}

impl CompletionTask {
    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CompletionTask::HttpCompletion(_) => "http_completion",
            CompletionTask::WsMessage(_) => "ws_message",
            CompletionTask::WsOpen(_) => "ws_open",
            CompletionTask::WsClose(_) => "ws_close",
            CompletionTask::WsError(_) => "ws_error",
            CompletionTask::WsServerMessage(_) => "ws_server_message",
            CompletionTask::WsServerOpen(_) => "ws_server_open",
            CompletionTask::WsServerClose(_) => "ws_server_close",
            CompletionTask::WsServerError(_) => "ws_server_error",
        }
    }

    /// Handle of the session the event belongs to.
    pub fn owner(&self) -> Handle {
        match self {
            CompletionTask::HttpCompletion(t) => t.request,
            CompletionTask::WsMessage(t) => t.client,
            CompletionTask::WsOpen(t) => t.client,
            CompletionTask::WsClose(t) => t.client,
            CompletionTask::WsError(t) => t.client,
            CompletionTask::WsServerMessage(t) => t.server,
            CompletionTask::WsServerOpen(t) => t.server,
            CompletionTask::WsServerClose(t) => t.server,
            CompletionTask::WsServerError(t) => t.server,
        }
    }
}

impl From<HttpCompletion> for CompletionTask {
    fn from(task: HttpCompletion) -> Self {
        CompletionTask::HttpCompletion(task)
    }
}

impl From<WsMessage> for CompletionTask {
    fn from(task: WsMessage) -> Self {
        CompletionTask::WsMessage(task)
    }
}

impl From<WsOpen> for CompletionTask {
    fn from(task: WsOpen) -> Self {
        CompletionTask::WsOpen(task)
    }
}

impl From<WsClose> for CompletionTask {
    fn from(task: WsClose) -> Self {
        CompletionTask::WsClose(task)
    }
}

impl From<WsError> for CompletionTask {
    fn from(task: WsError) -> Self {
        CompletionTask::WsError(task)
    }
}

impl From<WsServerMessage> for CompletionTask {
    fn from(task: WsServerMessage) -> Self {
        CompletionTask::WsServerMessage(task)
    }
}

impl From<WsServerOpen> for CompletionTask {
    fn from(task: WsServerOpen) -> Self {
        CompletionTask::WsServerOpen(task)
    }
}

impl From<WsServerClose> for CompletionTask {
    fn from(task: WsServerClose) -> Self {
        CompletionTask::WsServerClose(task)
    }
}

impl From<WsServerError> for CompletionTask {
    fn from(task: WsServerError) -> Self {
        CompletionTask::WsServerError(task)
    }
}
