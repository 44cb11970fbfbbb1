//! Asynchronous HTTP request subsystem.
//!
//! # Data Flow
//! ```text
//! Host (drain thread)
//!     → HttpRequestSession (configure: headers, body, form, timeouts)
//!     → Bridge::http_perform (verb, callback, user value)
//!     → runtime worker: reqwest send + read body
//!     → response headers cached under lock
//!     → HttpCompletion pushed to TaskQueue
//!
//! Drain loop
//!     → callback(request, body, status, body_len, value)
//!     → request handle released
//! ```
//!
//! # Design Decisions
//! - Single-shot: the session ends with its one completion
//! - Submit never blocks past spawning the request future
//! - Header accessors are safe while the response lands concurrently

pub mod form;
pub mod request;

pub use form::FormParams;
pub use request::{HttpCall, HttpRequestSession, HttpVerb, RequestOptions};
