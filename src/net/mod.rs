//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (WebSocket server)
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (connection id, live-connection tracking)
//!     → Hand off to the WebSocket handshake and pump
//!
//! Handshake / response metadata
//!     → headers.rs (case-insensitive snapshot)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked so stop can wait for it
//! - Header snapshots are plain owned data, safe to move across threads

pub mod connection;
pub mod headers;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use headers::Headers;
pub use listener::{ConnectionPermit, Listener, ListenerError};
