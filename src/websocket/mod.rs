//! WebSocket client and server subsystem.
//!
//! # Data Flow
//! ```text
//! Durable client:
//!     connect → runtime worker: handshake → WsOpen
//!             → pump: WsMessage* → WsClose | WsError
//!
//! Server:
//!     start → accept loop → per connection: handshake (headers captured)
//!           → header registry insert → WsServerOpen
//!           → pump: WsServerMessage* → registry remove → WsServerClose | WsServerError
//!
//! Drain loop:
//!     WsServerMessage → ephemeral client wrapping the connection link
//!                     → callback → ephemeral client released
//! ```
//!
//! # Design Decisions
//! - One pump task per socket: events of one connection stay ordered
//! - Sessions never invoke callbacks; they only push tasks
//! - Ephemeral clients borrow the connection link and never stop the socket

pub mod client;
pub mod pump;
pub mod server;

use std::net::SocketAddr;

use crate::net::ConnectionId;

pub use client::{MessageMode, ReadyState, WebSocketClientSession};
pub use pump::{ConnectionLink, Outbound};
pub use server::WebSocketServerSession;

/// Identity of a server-accepted connection as reported to callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub connection_id: ConnectionId,
    /// `"<ip>:<port>"` of the remote end.
    pub remote_address: String,
}

impl PeerInfo {
    pub fn new(connection_id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            connection_id,
            remote_address: format!("{}:{}", addr.ip(), addr.port()),
        }
    }
}
