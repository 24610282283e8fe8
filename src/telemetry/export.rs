//! Span export collaborators.
//!
//! # Responsibilities
//! - Accept completed spans for out-of-band delivery
//! - Provide a structured-log exporter for standalone runs
//! - Provide a channel exporter for embedders and tests
//!
//! # Design Decisions
//! - `export` is synchronous and must not block: the log exporter emits a
//!   single event, the channel exporter pushes onto an unbounded queue
//! - Exporters are shared across all connections, hence `Send + Sync`

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::telemetry::span::SpanData;

/// Receives completed spans.
pub trait SpanExporter: Send + Sync + fmt::Debug {
    /// Hand over one completed span. Must not block.
    fn export(&self, span: SpanData);

    /// Flush and release resources at process shutdown.
    fn shutdown(&self) {}
}

/// Exporter selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// Emit each span as a structured log event.
    #[default]
    Log,
    /// Discard spans.
    None,
}

/// Writes every span as one `tracing` event on the `echo_gateway::spans` target.
#[derive(Debug, Default)]
pub struct LogExporter;

impl SpanExporter for LogExporter {
    fn export(&self, span: SpanData) {
        match serde_json::to_string(&span) {
            Ok(payload) => tracing::info!(
                target: "echo_gateway::spans",
                span = %span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_span_id = ?span.parent_span_id().map(|id| id.to_string()),
                error = span.is_error(),
                payload = %payload,
                "Span finished"
            ),
            Err(e) => tracing::warn!(
                target: "echo_gateway::spans",
                span = %span.name,
                error = %e,
                "Failed to serialize span"
            ),
        }
    }
}

/// Forwards spans to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelExporter {
    tx: mpsc::UnboundedSender<SpanData>,
}

impl ChannelExporter {
    /// Create the exporter and the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SpanData>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SpanExporter for ChannelExporter {
    fn export(&self, span: SpanData) {
        if self.tx.send(span).is_err() {
            tracing::debug!("Span receiver dropped, discarding span");
        }
    }
}

/// Discards every span.
#[derive(Debug, Default)]
pub struct NoopExporter;

impl SpanExporter for NoopExporter {
    fn export(&self, _span: SpanData) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::span::SpanRecorder;
    use std::sync::Arc;

    #[test]
    fn channel_exporter_survives_dropped_receiver() {
        let (exporter, rx) = ChannelExporter::new();
        drop(rx);
        let recorder = SpanRecorder::new(Arc::new(exporter), "test");
        let mut span = recorder.start_span("op", None);
        assert!(span.end().is_ok());
    }

    #[test]
    fn log_exporter_accepts_spans() {
        let recorder = SpanRecorder::new(Arc::new(LogExporter), "test");
        let mut span = recorder.start_span("op", None);
        span.add_event("data_received").unwrap();
        assert!(span.end().is_ok());
        assert_eq!(recorder.stats().exported(), 1);
    }

    #[test]
    fn exporter_kind_from_config_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            exporter: ExporterKind,
        }
        let parsed: Wrapper = toml::from_str(r#"exporter = "none""#).unwrap();
        assert_eq!(parsed.exporter, ExporterKind::None);
    }
}
