//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (connections, messages, spans)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_connections_total` (counter): accepted connections by transport
//! - `gateway_active_connections` (gauge): open connections by transport
//! - `gateway_messages_total` (counter): processed messages by transport, outcome
//! - `gateway_message_duration_seconds` (histogram): per-message processing time
//! - `gateway_spans_exported_total` (counter): closed spans by status
//! - `gateway_span_violations_total` (counter): lifecycle violations by kind
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users and
//!   tests pay nothing
//! - Labels are low-cardinality (`plain`/`tls`, `ok`/`error`)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened(transport: &'static str) {
    counter!("gateway_connections_total", "transport" => transport).increment(1);
    gauge!("gateway_active_connections", "transport" => transport).increment(1.0);
}

pub fn record_connection_closed(transport: &'static str) {
    gauge!("gateway_active_connections", "transport" => transport).decrement(1.0);
}

pub fn record_message(transport: &'static str, outcome: &'static str, start: Instant) {
    counter!("gateway_messages_total", "transport" => transport, "outcome" => outcome).increment(1);
    histogram!("gateway_message_duration_seconds", "transport" => transport)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_span_exported(errored: bool) {
    let status = if errored { "error" } else { "ok" };
    counter!("gateway_spans_exported_total", "status" => status).increment(1);
}

pub fn record_span_violation(kind: &'static str) {
    counter!("gateway_span_violations_total", "kind" => kind).increment(1);
}
