//! Errors reported synchronously to the caller of a bridge operation.
//!
//! Transport failures never show up here: they travel through the task
//! queue as ordinary completion data (HTTP status 0, WebSocket error events).

use thiserror::Error;

use crate::host::{Handle, HandleKind};

/// Configuration and resource-lifecycle errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The handle was never issued or has already been released.
    #[error("Invalid handle {0}")]
    InvalidHandle(Handle),

    /// The handle refers to a different kind of resource.
    #[error("Handle {handle} is not a {expected} handle")]
    WrongHandleKind { handle: Handle, expected: HandleKind },

    /// An operation needs a registered callback and none was supplied.
    #[error("No callback registered for {0}")]
    NoCallback(&'static str),

    /// Single-shot HTTP request was already handed to the transport.
    #[error("Request {0} was already submitted")]
    AlreadySubmitted(Handle),

    /// Client socket is already running.
    #[error("WebSocket {0} is already connected or connecting")]
    AlreadyConnected(Handle),

    /// Server listener is already running.
    #[error("WebSocket server {0} is already started")]
    AlreadyStarted(Handle),

    /// Ephemeral wrappers do not own a socket and cannot dial.
    #[error("WebSocket {0} wraps a server connection and cannot connect")]
    NotOwned(Handle),

    /// Listener could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The background runtime could not be built.
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    /// Document parse or serialization failure at a configuring call site.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL could not be parsed.
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// WebSocket clients only dial `ws://` and `wss://`.
    #[error("Unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    /// The handshake request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Header name or value is not valid on the wire.
    #[error("Invalid header '{0}'")]
    InvalidHeader(String),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
