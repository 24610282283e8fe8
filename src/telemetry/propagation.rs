//! Trace context propagation over handshake headers.
//!
//! # Responsibilities
//! - Decode a `TraceContext` from an HTTP header carrier
//! - Encode a `TraceContext` into a header carrier
//! - Offer the wire formats seen in the wild (W3C, Jaeger, B3)
//!
//! # Design Decisions
//! - Each format is backed by the OpenTelemetry propagator for it and
//!   reads/writes the `HeaderMap` through `opentelemetry-http`
//! - Decoding never fails: anything unrecognized yields `None` so the echo
//!   path always continues with a root span
//! - One format is chosen at startup (`PropagationFormat`) and used through
//!   a `Box<dyn Propagator>`; the message path has no format branching

use std::fmt;

use axum::http::HeaderMap;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::Context;
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_zipkin::B3Encoding;
use serde::{Deserialize, Serialize};

use crate::telemetry::context::TraceContext;

/// W3C Trace Context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Jaeger native propagation header.
pub const UBER_TRACE_ID_HEADER: &str = "uber-trace-id";
/// B3 single-header format.
pub const B3_HEADER: &str = "b3";
pub const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
pub const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
pub const B3_SAMPLED_HEADER: &str = "x-b3-sampled";
pub const B3_FLAGS_HEADER: &str = "x-b3-flags";

/// A pluggable trace context codec.
pub trait Propagator: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Extract a context from the carrier. Returns `None` when no usable
    /// header is present.
    fn decode(&self, headers: &HeaderMap) -> Option<TraceContext>;

    /// Render a context into a fresh carrier.
    fn encode(&self, context: &TraceContext) -> HeaderMap;
}

/// Propagation format selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PropagationFormat {
    #[default]
    W3c,
    Jaeger,
    B3,
}

impl PropagationFormat {
    pub fn name(self) -> &'static str {
        match self {
            PropagationFormat::W3c => "w3c",
            PropagationFormat::Jaeger => "jaeger",
            PropagationFormat::B3 => "b3",
        }
    }

    /// Build the codec for this format.
    pub fn propagator(self) -> Box<dyn Propagator> {
        let inner: Box<dyn TextMapPropagator + Send + Sync> = match self {
            PropagationFormat::W3c => Box::new(TraceContextPropagator::new()),
            PropagationFormat::Jaeger => Box::new(opentelemetry_jaeger_propagator::Propagator::default()),
            // Decoding accepts either B3 form; encoding writes both.
            PropagationFormat::B3 => Box::new(opentelemetry_zipkin::Propagator::with_encoding(
                B3Encoding::SingleAndMultiHeader,
            )),
        };
        Box::new(HeaderPropagator {
            format: self,
            inner,
        })
    }
}

/// Adapts an OpenTelemetry text map propagator to header carriers.
pub struct HeaderPropagator {
    format: PropagationFormat,
    inner: Box<dyn TextMapPropagator + Send + Sync>,
}

impl fmt::Debug for HeaderPropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderPropagator")
            .field("format", &self.format)
            .field("fields", &self.inner.fields().collect::<Vec<_>>())
            .finish()
    }
}

impl Propagator for HeaderPropagator {
    fn name(&self) -> &'static str {
        self.format.name()
    }

    fn decode(&self, headers: &HeaderMap) -> Option<TraceContext> {
        // Start from an empty context so nothing ambient leaks in as a parent.
        let cx = self
            .inner
            .extract_with_context(&Context::new(), &HeaderExtractor(headers));
        TraceContext::from_otel(&cx)
    }

    fn encode(&self, context: &TraceContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.inner
            .inject_context(&context.to_otel(), &mut HeaderInjector(&mut headers));
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn decode(format: PropagationFormat, pairs: &[(&str, &str)]) -> Option<TraceContext> {
        format.propagator().decode(&headers(pairs))
    }

    #[test]
    fn w3c_decodes_valid_traceparent() {
        let ctx = decode(
            PropagationFormat::W3c,
            &[(
                TRACEPARENT_HEADER,
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            )],
        )
        .unwrap();
        assert_eq!(ctx.trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id.to_string(), "00f067aa0ba902b7");
        assert!(ctx.is_sampled());
    }

    #[test]
    fn w3c_rejects_malformed_values() {
        for value in [
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "00-4bf92f3577b34da6-00f067aa0ba902b7-01",
            "garbage",
        ] {
            assert!(
                decode(PropagationFormat::W3c, &[(TRACEPARENT_HEADER, value)]).is_none(),
                "accepted {value}"
            );
        }
    }

    #[test]
    fn w3c_requires_lowercase_hex_ids() {
        for value in [
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00F067AA0BA902B7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00F067AA0BA902B7-01",
        ] {
            assert!(
                decode(PropagationFormat::W3c, &[(TRACEPARENT_HEADER, value)]).is_none(),
                "accepted {value}"
            );
        }
    }

    #[test]
    fn absent_headers_decode_to_none() {
        for format in [PropagationFormat::W3c, PropagationFormat::Jaeger, PropagationFormat::B3] {
            assert!(decode(format, &[]).is_none(), "{}", format.name());
        }
    }

    #[test]
    fn formats_ignore_each_other() {
        let w3c = [(
            TRACEPARENT_HEADER,
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )];
        assert!(decode(PropagationFormat::Jaeger, &w3c).is_none());
        assert!(decode(PropagationFormat::B3, &w3c).is_none());
    }

    #[test]
    fn jaeger_decodes_short_and_url_encoded_ids() {
        let ctx = decode(
            PropagationFormat::Jaeger,
            &[(UBER_TRACE_ID_HEADER, "a3ce929d0e0e4736:00f067aa0ba902b7:0:1")],
        )
        .unwrap();
        assert_eq!(ctx.trace_id.to_string(), "0000000000000000a3ce929d0e0e4736");
        assert!(ctx.is_sampled());

        let encoded = decode(
            PropagationFormat::Jaeger,
            &[(UBER_TRACE_ID_HEADER, "a3ce929d0e0e4736%3A00f067aa0ba902b7%3A0%3A0")],
        )
        .unwrap();
        assert_eq!(encoded.span_id.to_string(), "00f067aa0ba902b7");
        assert!(!encoded.is_sampled());
    }

    #[test]
    fn jaeger_debug_flag_implies_sampled() {
        let ctx = decode(
            PropagationFormat::Jaeger,
            &[(UBER_TRACE_ID_HEADER, "a3ce929d0e0e4736:00f067aa0ba902b7:0:2")],
        )
        .unwrap();
        assert!(ctx.is_sampled());
    }

    #[test]
    fn jaeger_rejects_wrong_field_count() {
        assert!(decode(
            PropagationFormat::Jaeger,
            &[(UBER_TRACE_ID_HEADER, "a3ce929d0e0e4736:00f067aa0ba902b7:1")],
        )
        .is_none());
    }

    #[test]
    fn b3_single_header_is_preferred() {
        let ctx = decode(
            PropagationFormat::B3,
            &[
                (B3_HEADER, "80f198ee56343ba864fe8b2a57d3eff7-e457b5a2e4d86bd1-0-05e3ac9a4f6e3b90"),
                (B3_TRACE_ID_HEADER, "0000000000000001"),
                (B3_SPAN_ID_HEADER, "0000000000000002"),
            ],
        )
        .unwrap();
        assert_eq!(ctx.trace_id.to_string(), "80f198ee56343ba864fe8b2a57d3eff7");
        assert_eq!(ctx.span_id.to_string(), "e457b5a2e4d86bd1");
        assert!(!ctx.is_sampled());
    }

    #[test]
    fn b3_sampling_only_header_has_no_parent() {
        assert!(decode(PropagationFormat::B3, &[(B3_HEADER, "0")]).is_none());
    }

    #[test]
    fn b3_multi_header_honours_debug_flag() {
        let ctx = decode(
            PropagationFormat::B3,
            &[
                ("X-B3-TraceId", "463ac35c9f6413ad"),
                ("X-B3-SpanId", "a2fb4a1d1a96d312"),
                ("X-B3-Flags", "1"),
            ],
        )
        .unwrap();
        assert_eq!(ctx.trace_id.to_string(), "0000000000000000463ac35c9f6413ad");
        assert!(ctx.is_sampled());
    }

    #[test]
    fn b3_encoding_writes_single_and_multi_headers() {
        let ctx = TraceContext::random(true);
        let carrier = PropagationFormat::B3.propagator().encode(&ctx);
        assert!(carrier.contains_key(B3_HEADER));
        assert_eq!(
            carrier.get(B3_TRACE_ID_HEADER).unwrap(),
            ctx.trace_id.to_string().as_str()
        );
        assert_eq!(carrier.get(B3_SAMPLED_HEADER).unwrap(), "1");
    }

    #[test]
    fn encode_then_decode_preserves_context() {
        for sampled in [true, false] {
            let ctx = TraceContext::random(sampled);
            for format in [PropagationFormat::W3c, PropagationFormat::Jaeger, PropagationFormat::B3] {
                let propagator = format.propagator();
                assert_eq!(
                    propagator.decode(&propagator.encode(&ctx)),
                    Some(ctx),
                    "{}",
                    propagator.name()
                );
            }
        }
    }

    #[test]
    fn format_deserializes_from_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: PropagationFormat,
        }
        let parsed: Wrapper = toml::from_str(r#"format = "jaeger""#).unwrap();
        assert_eq!(parsed.format, PropagationFormat::Jaeger);
    }
}
