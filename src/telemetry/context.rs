//! The propagated trace context and id generation.
//!
//! # Responsibilities
//! - Carry a remote parent (trace id, span id, trace flags) between the
//!   propagation codecs and the span recorder
//! - Convert to and from an OpenTelemetry `Context`, which is what the
//!   crate propagators read and write
//! - Random id generation for root spans and new child spans
//!
//! # Design Decisions
//! - Ids are the OpenTelemetry `TraceId`/`SpanId` types; an invalid
//!   (all-zero) context never converts back, so a malformed carrier
//!   degrades to "no parent" instead of a bogus trace
//! - `TraceContext` is a plain value: decoded once, never mutated

use std::fmt;

use opentelemetry::trace::{SpanContext, TraceContextExt, TraceFlags, TraceState};
use opentelemetry::Context;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

pub use opentelemetry::trace::{SpanId, TraceId};

/// Generate a random, valid trace id.
pub fn random_trace_id() -> TraceId {
    RandomIdGenerator::default().new_trace_id()
}

/// Generate a random, valid span id.
pub fn random_span_id() -> SpanId {
    RandomIdGenerator::default().new_span_id()
}

/// Serialize an id through its lowercase hex `Display` form.
pub(crate) fn serialize_hex<T, S>(id: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: fmt::Display,
    S: Serializer,
{
    serializer.collect_str(id)
}

/// Portable trace context carried across a protocol boundary.
///
/// `span_id` is the id of the remote span that becomes the parent of any
/// span started from this context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub trace_flags: TraceFlags,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            trace_flags: TraceFlags::default().with_sampled(sampled),
        }
    }

    /// A fresh context with random ids, e.g. for a client starting a trace.
    pub fn random(sampled: bool) -> Self {
        Self::new(random_trace_id(), random_span_id(), sampled)
    }

    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// Read the remote span context out of an OpenTelemetry `Context`.
    /// Returns `None` when it holds no valid span context.
    pub fn from_otel(cx: &Context) -> Option<Self> {
        let span = cx.span();
        let span_context = span.span_context();
        span_context.is_valid().then(|| Self {
            trace_id: span_context.trace_id(),
            span_id: span_context.span_id(),
            trace_flags: span_context.trace_flags(),
        })
    }

    /// An OpenTelemetry `Context` holding this as its remote span context.
    pub fn to_otel(&self) -> Context {
        let span_context = SpanContext::new(
            self.trace_id,
            self.span_id,
            self.trace_flags,
            true,
            TraceState::default(),
        );
        Context::new().with_remote_span_context(span_context)
    }
}

impl Serialize for TraceContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TraceContext", 3)?;
        state.serialize_field("trace_id", &self.trace_id.to_string())?;
        state.serialize_field("span_id", &self.span_id.to_string())?;
        state.serialize_field("sampled", &self.is_sampled())?;
        state.end()
    }
}
