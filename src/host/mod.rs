//! Boundary to the hosting runtime's collaborators.
//!
//! # Data Flow
//! ```text
//! Host call site
//!     → handles.rs (handle → session / document)
//!     → forward.rs (registered callbacks for an event slot)
//!     → json.rs (text ⇄ document)
//!
//! Drain loop
//!     → resolves task's handle (no-op if released)
//!     → Forward::execute with positional Params
//!     → releases single-shot handles
//! ```
//!
//! # Design Decisions
//! - Handles are generation-checked; tasks hold handles, never references
//! - Forwards can be queried from any thread but execute only on the drain thread
//! - No lock is held while a callback runs

pub mod forward;
pub mod handles;
pub mod json;

pub use forward::{Forward, Listener, Param};
pub use handles::{Handle, HandleKind, HandleTable};
pub use json::JsonStore;
