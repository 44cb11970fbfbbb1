//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sessions, queue and drain loop produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (task counters, queue depth, socket gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Session handles, connection ids and request ids flow through log fields
//! - Metrics are cheap (atomic increments) and off the hot path of delivery

pub mod logging;
pub mod metrics;
