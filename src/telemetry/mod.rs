//! Distributed tracing subsystem.
//!
//! # Data Flow
//! ```text
//! WebSocket handshake headers (captured once per connection)
//!     → propagation.rs (decode TraceContext, format chosen at startup)
//!     → span.rs (start child/root span per message, events, tags, end)
//!     → export.rs (completed SpanData to the export collaborator)
//! ```
//!
//! # Design Decisions
//! - One `Telemetry` value per process, built at startup and shared by `Arc`
//! - Codec and exporter are trait objects; the message path never branches
//!   on the wire format
//! - `shutdown` flushes the exporter after listeners have drained

pub mod context;
pub mod export;
pub mod propagation;
pub mod span;

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::config::TracingConfig;

pub use context::{random_span_id, random_trace_id, SpanId, TraceContext, TraceId};
pub use export::{ChannelExporter, ExporterKind, LogExporter, NoopExporter, SpanExporter};
pub use propagation::{PropagationFormat, Propagator};
pub use span::{Span, SpanData, SpanError, SpanRecorder, SpanStatus, TagValue};

/// Process-scoped tracing state: the selected codec plus a span recorder.
#[derive(Debug)]
pub struct Telemetry {
    propagator: Box<dyn Propagator>,
    recorder: SpanRecorder,
    operation_name: String,
}

impl Telemetry {
    /// Build from configuration, using the configured exporter.
    pub fn from_config(config: &TracingConfig) -> Self {
        let exporter: Arc<dyn SpanExporter> = match config.exporter {
            ExporterKind::Log => Arc::new(LogExporter),
            ExporterKind::None => Arc::new(NoopExporter),
        };
        Self::with_exporter(config, exporter)
    }

    /// Build from configuration with an externally supplied exporter.
    pub fn with_exporter(config: &TracingConfig, exporter: Arc<dyn SpanExporter>) -> Self {
        let propagator = config.propagation.propagator();
        tracing::info!(
            propagation = propagator.name(),
            exporter = ?exporter,
            operation = %config.operation_name,
            "Telemetry initialized"
        );
        Self {
            propagator,
            recorder: SpanRecorder::new(exporter, config.service_name.as_str()),
            operation_name: config.operation_name.clone(),
        }
    }

    /// Decode the inbound context from a handshake carrier.
    pub fn extract(&self, headers: &HeaderMap) -> Option<TraceContext> {
        self.propagator.decode(headers)
    }

    /// Start the per-message span for an optional inbound context.
    pub fn start_message_span(&self, parent: Option<&TraceContext>) -> Span {
        self.recorder.start_span(self.operation_name.as_str(), parent)
    }

    pub fn propagator(&self) -> &dyn Propagator {
        self.propagator.as_ref()
    }

    pub fn recorder(&self) -> &SpanRecorder {
        &self.recorder
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Flush the exporter. Call once, after all connections have drained.
    pub fn shutdown(&self) {
        let stats = self.recorder.stats();
        tracing::info!(
            spans_started = stats.started(),
            spans_exported = stats.exported(),
            lifecycle_violations = stats.violations(),
            "Telemetry shutting down"
        );
        self.recorder.exporter().shutdown();
    }
}
