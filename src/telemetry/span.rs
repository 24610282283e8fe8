//! Span recording.
//!
//! # Responsibilities
//! - Start spans as children of a decoded context or as fresh roots
//! - Record timestamped events, tags and error status
//! - Close each span exactly once and hand it to the exporter
//!
//! # Design Decisions
//! - Lifecycle violations (double end, mutation after end) are returned as
//!   `SpanError`, logged at error level and counted; they are never ignored
//! - A span dropped before `end` is closed by `Drop`, marked errored and
//!   still exported, so cancelled tasks never leak unterminated spans

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;

use crate::observability::metrics;
use crate::telemetry::context::{self, random_span_id, random_trace_id, SpanId, TraceContext, TraceId};
use crate::telemetry::export::SpanExporter;

/// Tag key set on errored spans.
pub const ERROR_TAG: &str = "error";
/// Tag key holding the error description.
pub const ERROR_MESSAGE_TAG: &str = "error.message";

/// Contract violations on a span's lifecycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpanError {
    #[error("span '{span}' was already ended")]
    AlreadyEnded { span: String },

    #[error("event '{event}' added to span '{span}' after it ended")]
    EventAfterEnd { span: String, event: String },

    #[error("tag '{tag}' set on span '{span}' after it ended")]
    TagAfterEnd { span: String, tag: String },
}

impl SpanError {
    fn kind(&self) -> &'static str {
        match self {
            SpanError::AlreadyEnded { .. } => "already_ended",
            SpanError::EventAfterEnd { .. } => "event_after_end",
            SpanError::TagAfterEnd { .. } => "tag_after_end",
        }
    }
}

/// A tag value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    String(String),
    Bool(bool),
    Int(i64),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::String(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::String(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<usize> for TagValue {
    fn from(value: usize) -> Self {
        TagValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

/// A timestamped marker inside a span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: SystemTime,
}

/// Final status of a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "code", content = "message", rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Ok,
    Error(String),
}

/// Completed span as handed to the exporter.
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    pub name: String,
    #[serde(serialize_with = "context::serialize_hex")]
    pub trace_id: TraceId,
    #[serde(serialize_with = "context::serialize_hex")]
    pub span_id: SpanId,
    /// Remote context this span continues, if any.
    pub parent: Option<TraceContext>,
    pub sampled: bool,
    pub start_time: SystemTime,
    /// `None` only while the span is open.
    pub end_time: Option<SystemTime>,
    pub events: Vec<SpanEvent>,
    pub tags: BTreeMap<String, TagValue>,
    pub status: SpanStatus,
}

impl SpanData {
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent.map(|p| p.span_id)
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.iter().any(|e| e.name == name)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, SpanStatus::Error(_))
    }
}

/// Counters shared by every span of one recorder.
#[derive(Debug, Default)]
pub struct SpanStats {
    started: AtomicU64,
    exported: AtomicU64,
    violations: AtomicU64,
}

impl SpanStats {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn exported(&self) -> u64 {
        self.exported.load(Ordering::Relaxed)
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }
}

/// Creates spans bound to one exporter.
#[derive(Debug, Clone)]
pub struct SpanRecorder {
    exporter: Arc<dyn SpanExporter>,
    service_name: Arc<str>,
    stats: Arc<SpanStats>,
}

impl SpanRecorder {
    pub fn new(exporter: Arc<dyn SpanExporter>, service_name: impl Into<Arc<str>>) -> Self {
        Self {
            exporter,
            service_name: service_name.into(),
            stats: Arc::new(SpanStats::default()),
        }
    }

    /// Start a span. With a parent it joins the parent's trace and inherits
    /// its sampling decision; otherwise it is a sampled root.
    pub fn start_span(&self, name: impl Into<String>, parent: Option<&TraceContext>) -> Span {
        let (trace_id, sampled) = match parent {
            Some(p) => (p.trace_id, p.is_sampled()),
            None => (random_trace_id(), true),
        };

        let mut tags = BTreeMap::new();
        tags.insert(
            "service.name".to_string(),
            TagValue::String(self.service_name.to_string()),
        );

        self.stats.started.fetch_add(1, Ordering::Relaxed);

        Span {
            data: Some(SpanData {
                name: name.into(),
                trace_id,
                span_id: random_span_id(),
                parent: parent.copied(),
                sampled,
                start_time: SystemTime::now(),
                end_time: None,
                events: Vec::new(),
                tags,
                status: SpanStatus::Ok,
            }),
            name: String::new(),
            exporter: Arc::clone(&self.exporter),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn stats(&self) -> &SpanStats {
        &self.stats
    }

    pub fn exporter(&self) -> &Arc<dyn SpanExporter> {
        &self.exporter
    }
}

/// An open (or ended) span.
///
/// Mutations are only valid until `end`. The span keeps its name after
/// ending so violations can be reported against it.
#[derive(Debug)]
pub struct Span {
    data: Option<SpanData>,
    name: String,
    exporter: Arc<dyn SpanExporter>,
    stats: Arc<SpanStats>,
}

impl Span {
    /// Append a timestamped event.
    pub fn add_event(&mut self, name: impl Into<String>) -> Result<(), SpanError> {
        let event = name.into();
        match self.data.as_mut() {
            Some(data) => {
                data.events.push(SpanEvent {
                    name: event,
                    timestamp: SystemTime::now(),
                });
                Ok(())
            }
            None => Err(self.violation(SpanError::EventAfterEnd {
                span: self.name.clone(),
                event,
            })),
        }
    }

    /// Set (or overwrite) a tag.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Result<(), SpanError> {
        let key = key.into();
        match self.data.as_mut() {
            Some(data) => {
                data.tags.insert(key, value.into());
                Ok(())
            }
            None => Err(self.violation(SpanError::TagAfterEnd {
                span: self.name.clone(),
                tag: key,
            })),
        }
    }

    /// Mark the span as failed.
    pub fn set_error(&mut self, message: impl Into<String>) -> Result<(), SpanError> {
        let message = message.into();
        self.set_tag(ERROR_TAG, true)?;
        self.set_tag(ERROR_MESSAGE_TAG, message.clone())?;
        if let Some(data) = self.data.as_mut() {
            data.status = SpanStatus::Error(message);
        }
        Ok(())
    }

    /// Close the span and export it. A second call is a contract violation.
    pub fn end(&mut self) -> Result<(), SpanError> {
        match self.data.take() {
            Some(mut data) => {
                data.end_time = Some(SystemTime::now());
                self.name = data.name.clone();
                self.export(data);
                Ok(())
            }
            None => Err(self.violation(SpanError::AlreadyEnded {
                span: self.name.clone(),
            })),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.data.is_none()
    }

    /// Context identifying this span, for use as a parent of downstream work.
    pub fn context(&self) -> Option<TraceContext> {
        self.data
            .as_ref()
            .map(|d| TraceContext::new(d.trace_id, d.span_id, d.sampled))
    }

    /// Remote parent this span continues.
    pub fn parent(&self) -> Option<TraceContext> {
        self.data.as_ref().and_then(|d| d.parent)
    }

    pub fn name(&self) -> &str {
        match &self.data {
            Some(data) => &data.name,
            None => &self.name,
        }
    }

    fn export(&self, data: SpanData) {
        self.stats.exported.fetch_add(1, Ordering::Relaxed);
        metrics::record_span_exported(data.is_error());
        self.exporter.export(data);
    }

    fn violation(&self, error: SpanError) -> SpanError {
        self.stats.violations.fetch_add(1, Ordering::Relaxed);
        metrics::record_span_violation(error.kind());
        tracing::error!(error = %error, "Span lifecycle violation");
        error
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if let Some(mut data) = self.data.take() {
            tracing::warn!(
                span = %data.name,
                trace_id = %data.trace_id,
                "Span dropped before end, closing as errored"
            );
            let message = "span dropped before end".to_string();
            data.tags.insert(ERROR_TAG.to_string(), TagValue::Bool(true));
            data.tags
                .insert(ERROR_MESSAGE_TAG.to_string(), TagValue::String(message.clone()));
            data.status = SpanStatus::Error(message);
            data.end_time = Some(SystemTime::now());
            self.export(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::export::ChannelExporter;

    fn recorder() -> (SpanRecorder, tokio::sync::mpsc::UnboundedReceiver<SpanData>) {
        let (exporter, rx) = ChannelExporter::new();
        (SpanRecorder::new(Arc::new(exporter), "test"), rx)
    }

    #[test]
    fn root_span_without_parent() {
        let (recorder, mut rx) = recorder();
        let mut span = recorder.start_span("http_request", None);
        assert!(span.parent().is_none());
        span.end().unwrap();

        let data = rx.try_recv().unwrap();
        assert_eq!(data.name, "http_request");
        assert!(data.parent.is_none());
        assert!(data.end_time.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn child_span_joins_parent_trace() {
        let (recorder, mut rx) = recorder();
        let parent = TraceContext::random(false);
        let mut span = recorder.start_span("http_request", Some(&parent));
        span.end().unwrap();

        let data = rx.try_recv().unwrap();
        assert_eq!(data.parent, Some(parent));
        assert_eq!(data.trace_id, parent.trace_id);
        assert_ne!(data.span_id, parent.span_id);
        assert!(!data.sampled);
    }

    #[test]
    fn events_and_tags_are_recorded() {
        let (recorder, mut rx) = recorder();
        let mut span = recorder.start_span("op", None);
        span.add_event("data_received").unwrap();
        span.set_tag("message.bytes", 2usize).unwrap();
        span.end().unwrap();

        let data = rx.try_recv().unwrap();
        assert!(data.has_event("data_received"));
        assert_eq!(data.tags.get("message.bytes"), Some(&TagValue::Int(2)));
        assert_eq!(
            data.tags.get("service.name"),
            Some(&TagValue::String("test".into()))
        );
    }

    #[test]
    fn double_end_is_always_reported() {
        let (recorder, mut rx) = recorder();
        let mut span = recorder.start_span("op", None);
        span.end().unwrap();

        for _ in 0..3 {
            assert_eq!(
                span.end(),
                Err(SpanError::AlreadyEnded { span: "op".into() })
            );
        }
        assert_eq!(recorder.stats().violations(), 3);
        assert_eq!(recorder.stats().exported(), 1);
        rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn mutation_after_end_is_rejected() {
        let (recorder, _rx) = recorder();
        let mut span = recorder.start_span("op", None);
        span.end().unwrap();

        assert!(matches!(
            span.add_event("late"),
            Err(SpanError::EventAfterEnd { .. })
        ));
        assert!(matches!(
            span.set_tag("late", true),
            Err(SpanError::TagAfterEnd { .. })
        ));
        assert_eq!(span.name(), "op");
    }

    #[test]
    fn dropped_span_is_closed_as_errored() {
        let (recorder, mut rx) = recorder();
        {
            let mut span = recorder.start_span("op", None);
            span.add_event("data_received").unwrap();
        }

        let data = rx.try_recv().unwrap();
        assert!(data.is_error());
        assert!(data.end_time.is_some());
        assert_eq!(data.tags.get(ERROR_TAG), Some(&TagValue::Bool(true)));
    }

    #[test]
    fn set_error_marks_status() {
        let (recorder, mut rx) = recorder();
        let mut span = recorder.start_span("op", None);
        span.set_error("connection reset").unwrap();
        span.end().unwrap();

        let data = rx.try_recv().unwrap();
        assert_eq!(data.status, SpanStatus::Error("connection reset".into()));
    }
}
