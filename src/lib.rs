//! Cross-thread event delivery for WebSocket clients, WebSocket servers and
//! asynchronous HTTP requests.
//!
//! Network I/O runs on background runtime threads. Every completion (frame,
//! open, close, error, HTTP response) becomes a task on one queue, and user
//! callbacks run only when the owning thread calls [`Bridge::drain`].

// Core subsystems
pub mod bridge;
pub mod host;
pub mod queue;

// Transports
pub mod http;
pub mod net;
pub mod websocket;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use bridge::{Bridge, WsEvent};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use host::{Handle, HandleKind, Listener, Param};
pub use http::{HttpCall, HttpVerb};
pub use websocket::MessageMode;
