//! # Trace propagation
//!
//! Trace and span identifiers, the B3 propagator that moves a
//! [`TraceContext`] in and out of a [`TraceCarrier`], and lightweight timed
//! spans for producer and consumer operations.

use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::carrier::{
    TraceCarrier, B3_FLAGS_HEADER, B3_PARENT_SPAN_ID_HEADER, B3_SAMPLED_HEADER, B3_SINGLE_HEADER,
    B3_SPAN_ID_HEADER, B3_TRACE_ID_HEADER,
};
use crate::error::{Error, Result};

/// Trace identifier (128-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

impl TraceId {
    /// Generates a new random trace ID
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Creates a trace ID from bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the trace ID as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns the trace ID as a 32 character hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a trace ID from hex. B3 allows 64-bit ids, which are left padded.
    ///
    /// # Errors
    /// Returns an error for non-hex input or a length other than 16 or 32.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex).map_err(|e| Error::InvalidTraceContext {
            message: format!("invalid trace ID hex: {e}"),
        })?;

        let mut array = [0u8; 16];
        match bytes.len() {
            16 => array.copy_from_slice(&bytes),
            8 => array[8..].copy_from_slice(&bytes),
            _ => {
                return Err(Error::InvalidTraceContext {
                    message: "trace ID must be 8 or 16 bytes".to_string(),
                })
            },
        }
        Ok(Self(array))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Span identifier (64-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId([u8; 8]);

impl SpanId {
    /// Generates a new random span ID
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&Uuid::new_v4().as_bytes()[..8]);
        Self(bytes)
    }

    /// Creates a span ID from bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Returns the span ID as a 16 character hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a span ID from a hex string
    ///
    /// # Errors
    /// Returns an error for non-hex input or a length other than 8 bytes.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex).map_err(|e| Error::InvalidTraceContext {
            message: format!("invalid span ID hex: {e}"),
        })?;

        if bytes.len() != 8 {
            return Err(Error::InvalidTraceContext {
                message: "span ID must be 8 bytes".to_string(),
            });
        }

        let mut array = [0u8; 8];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Trace context for propagation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub sampled: bool,
}

impl TraceContext {
    /// A fresh sampled root context.
    #[must_use]
    pub fn new_root() -> Self {
        Self {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            parent_span_id: None,
            sampled: true,
        }
    }

    /// A child context in the same trace.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::generate(),
            parent_span_id: Some(self.span_id),
            sampled: self.sampled,
        }
    }
}

/// B3 propagator.
///
/// Injects the multi-header form; extracts either the multi-header form or
/// the single `b3` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct B3Propagator;

impl B3Propagator {
    /// Creates a new propagator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Injects trace context into the carrier
    pub fn inject(&self, context: &TraceContext, carrier: &mut TraceCarrier) {
        carrier.set(B3_TRACE_ID_HEADER, context.trace_id.to_hex());
        carrier.set(B3_SPAN_ID_HEADER, context.span_id.to_hex());
        carrier.set(B3_SAMPLED_HEADER, if context.sampled { "1" } else { "0" });
        if let Some(parent) = context.parent_span_id {
            carrier.set(B3_PARENT_SPAN_ID_HEADER, parent.to_hex());
        }
    }

    /// Extracts trace context from the carrier
    #[must_use]
    pub fn extract(&self, carrier: &TraceCarrier) -> Option<TraceContext> {
        self.extract_multi(carrier)
            .or_else(|| Self::parse_single(carrier.get(B3_SINGLE_HEADER)))
    }

    fn extract_multi(&self, carrier: &TraceCarrier) -> Option<TraceContext> {
        let trace_id = TraceId::from_hex(carrier.get(B3_TRACE_ID_HEADER)).ok()?;
        let span_id = SpanId::from_hex(carrier.get(B3_SPAN_ID_HEADER)).ok()?;
        let parent_span_id = SpanId::from_hex(carrier.get(B3_PARENT_SPAN_ID_HEADER)).ok();

        // debug flag implies sampled; absent decision defaults to sampled
        let sampled = carrier.get(B3_FLAGS_HEADER) == "1"
            || !matches!(carrier.get(B3_SAMPLED_HEADER), "0" | "false");

        Some(TraceContext {
            trace_id,
            span_id,
            parent_span_id,
            sampled,
        })
    }

    // {trace_id}-{span_id}[-{sampling}[-{parent_span_id}]]
    fn parse_single(value: &str) -> Option<TraceContext> {
        let parts: Vec<&str> = value.split('-').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return None;
        }

        let trace_id = TraceId::from_hex(parts[0]).ok()?;
        let span_id = SpanId::from_hex(parts[1]).ok()?;
        let sampled = parts.get(2).map_or(true, |s| *s == "1" || *s == "d");
        let parent_span_id = parts.get(3).and_then(|p| SpanId::from_hex(p).ok());

        Some(TraceContext {
            trace_id,
            span_id,
            parent_span_id,
            sampled,
        })
    }
}

/// Span kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Internal,
    Producer,
    Consumer,
}

impl SpanKind {
    /// Lowercase name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

/// A timed span around one producer or consumer operation.
///
/// Ending the span emits a `tracing` event with its identifiers, duration and
/// recorded errors.
#[derive(Debug)]
pub struct Span {
    context: TraceContext,
    name: String,
    kind: SpanKind,
    start_time: Instant,
    errors: Vec<String>,
}

impl Span {
    /// Starts a span. With a parent the span joins its trace, otherwise it
    /// starts a new one.
    #[must_use]
    pub fn start(name: impl Into<String>, kind: SpanKind, parent: Option<&TraceContext>) -> Self {
        let context = parent.map_or_else(TraceContext::new_root, TraceContext::child);
        Self {
            context,
            name: name.into(),
            kind,
            start_time: Instant::now(),
            errors: Vec::new(),
        }
    }

    /// The span's own context, to be injected downstream.
    #[must_use]
    pub const fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Span name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Span kind
    #[must_use]
    pub const fn kind(&self) -> SpanKind {
        self.kind
    }

    /// Records an error event on the span
    pub fn record_error(&mut self, err: &dyn fmt::Display) {
        self.errors.push(err.to_string());
    }

    /// Errors recorded so far
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Elapsed time since start
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Ends the span
    pub fn end(self) {
        tracing::debug!(
            span_name = %self.name,
            span_kind = self.kind.as_str(),
            trace_id = %self.context.trace_id,
            span_id = %self.context.span_id,
            duration_us = self.start_time.elapsed().as_micros() as u64,
            errors = self.errors.len(),
            "span ended"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_hex_conversion() {
        let trace_id = TraceId::generate();
        let hex = trace_id.to_hex();
        let parsed = TraceId::from_hex(&hex).unwrap();

        assert_eq!(trace_id, parsed);
        assert_eq!(hex.len(), 32);
    }

    #[test]
    fn test_short_trace_id_is_padded() {
        let parsed = TraceId::from_hex("48485a3953bb6124").unwrap();
        assert_eq!(parsed.to_hex(), "000000000000000048485a3953bb6124");
        assert!(TraceId::from_hex("abc").is_err());
    }

    #[test]
    fn test_context_propagation() {
        let propagator = B3Propagator::new();
        let context = TraceContext::new_root().child();

        let mut carrier = TraceCarrier::new();
        propagator.inject(&context, &mut carrier);

        assert_eq!(carrier.get(B3_SAMPLED_HEADER), "1");
        let extracted = propagator.extract(&carrier).unwrap();
        assert_eq!(extracted, context);
    }

    #[test]
    fn test_extract_single_header() {
        let mut carrier = TraceCarrier::new();
        carrier.set(
            B3_SINGLE_HEADER,
            "80f198ee56343ba864fe8b2a57d3eff7-e457b5a2e4d86bd1-0-05e3ac9a4f6e3b90",
        );

        let extracted = B3Propagator::new().extract(&carrier).unwrap();
        assert_eq!(extracted.trace_id.to_hex(), "80f198ee56343ba864fe8b2a57d3eff7");
        assert_eq!(extracted.span_id.to_hex(), "e457b5a2e4d86bd1");
        assert!(!extracted.sampled);
        assert_eq!(extracted.parent_span_id.unwrap().to_hex(), "05e3ac9a4f6e3b90");
    }

    #[test]
    fn test_extract_from_empty_carrier() {
        assert!(B3Propagator::new().extract(&TraceCarrier::new()).is_none());
    }

    #[test]
    fn test_span_joins_parent_trace() {
        let parent = TraceContext::new_root();
        let mut span = Span::start("publish", SpanKind::Producer, Some(&parent));

        assert_eq!(span.context().trace_id, parent.trace_id);
        assert_eq!(span.context().parent_span_id, Some(parent.span_id));
        assert_ne!(span.context().span_id, parent.span_id);

        span.record_error(&"boom");
        assert_eq!(span.errors(), ["boom".to_string()]);
        span.end();
    }
}
