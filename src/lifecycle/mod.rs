//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Server stop / durable client release:
//!     Shutdown::trigger → accept loop exits → pumps send Close → sockets drop
//!
//! Bridge shutdown:
//!     discard pending tasks → release all handles → stop runtime
//! ```
//!
//! # Design Decisions
//! - Late subscribers check `is_triggered` so a trigger is never missed
//! - Stop waits for connections with a deadline, never indefinitely

pub mod shutdown;

pub use shutdown::Shutdown;
