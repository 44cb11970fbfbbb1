//! Metrics collection and exposition.
//!
//! # Metrics
//! - `netbridge_tasks_enqueued_total` (counter): tasks pushed, by task kind
//! - `netbridge_tasks_delivered_total` (counter): callbacks invoked, by task kind
//! - `netbridge_tasks_dropped_total` (counter): tasks skipped, by kind and reason
//! - `netbridge_tasks_abandoned_total` (counter): tasks discarded at shutdown
//! - `netbridge_queue_depth` (gauge): tasks seen by the last drain
//! - `netbridge_ws_connections_active` (gauge): open sockets, by role
//! - `netbridge_http_requests_total` (counter): responses, by verb and status
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - The Prometheus exporter is optional and off by default

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_task_enqueued(task: &'static str) {
    counter!("netbridge_tasks_enqueued_total", "task" => task).increment(1);
}

pub fn record_task_delivered(task: &'static str) {
    counter!("netbridge_tasks_delivered_total", "task" => task).increment(1);
}

pub fn record_task_dropped(task: &'static str, reason: &'static str) {
    counter!("netbridge_tasks_dropped_total", "task" => task, "reason" => reason).increment(1);
}

pub fn record_tasks_abandoned(count: usize) {
    counter!("netbridge_tasks_abandoned_total").increment(count as u64);
}

pub fn record_queue_depth(depth: usize) {
    gauge!("netbridge_queue_depth").set(depth as f64);
}

pub fn record_ws_connection_opened(role: &'static str) {
    gauge!("netbridge_ws_connections_active", "role" => role).increment(1.0);
}

pub fn record_ws_connection_closed(role: &'static str) {
    gauge!("netbridge_ws_connections_active", "role" => role).decrement(1.0);
}

pub fn record_http_request(verb: &'static str, status: u16) {
    counter!(
        "netbridge_http_requests_total",
        "verb" => verb,
        "status" => status.to_string()
    )
    .increment(1);
}
