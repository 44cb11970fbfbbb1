//! Cross-thread completion delivery.
//!
//! # Data Flow
//! ```text
//! Transport thread (HTTP response, WS frame, close, error)
//!     → session builds a CompletionTask snapshot
//!     → TaskQueue::push (any thread, never blocks)
//!
//! Host tick (single consumer)
//!     → TaskQueue::drain_all (atomic snapshot)
//!     → Bridge delivers each task in order
//! ```
//!
//! # Design Decisions
//! - Tasks are a closed enum; delivery is one function per variant
//! - Tasks carry data by value and sessions by handle
//! - Pending tasks at shutdown are abandoned, not delivered

#[allow(clippy::module_inception)]
pub mod queue;
pub mod task;

pub use queue::TaskQueue;
pub use task::{
    CompletionTask, HttpCompletion, WsClose, WsError, WsMessage, WsOpen, WsServerClose,
    WsServerError, WsServerMessage, WsServerOpen,
};
