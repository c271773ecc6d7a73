//! Distributed-tracing context propagation for Datadog tracers.
//!
//! This crate serializes and deserializes the identity of an in-flight
//! trace (trace id, span id, sampling decision, origin, vendor state,
//! baggage and propagated trace-level tags) across process boundaries,
//! using a configurable set of wire formats:
//!
//! - the Datadog multi-header format
//! - W3C trace context (`traceparent`/`tracestate`)
//! - Zipkin B3, multi-header and single-header
//! - the standalone W3C `baggage` header
//!
//! Formats are applied as an ordered chain. Injection writes every
//! configured format into the same carrier. Extraction walks the formats
//! in order: the first valid context wins, a later W3C context that agrees
//! on the trace id refines it, and contexts that disagree are recorded as
//! span links instead of being dropped on the floor.
//!
//! The chain is selected through `DD_TRACE_PROPAGATION_STYLE` and its
//! direction-specific variants (or `OTEL_PROPAGATORS`), and built once at
//! tracer start:
//!
//! ```
//! use std::collections::HashMap;
//! use datadog_propagation::{new_propagator, Carrier, SpanContext, TraceId};
//!
//! let propagator = new_propagator(None);
//!
//! let mut ctx = SpanContext::new();
//! ctx.set_trace_id(TraceId::from_parts(0, 42));
//! ctx.set_span_id(7);
//!
//! let mut headers = HashMap::new();
//! propagator
//!     .inject(&ctx, &mut Carrier::Writer(&mut headers))
//!     .unwrap();
//! assert!(headers.contains_key("traceparent"));
//!
//! let extracted = propagator.extract(&Carrier::Reader(&headers)).unwrap();
//! assert_eq!(extracted.trace_id().lower(), 42);
//! assert_eq!(extracted.span_id(), 7);
//! ```
//!
//! Propagator values are immutable after construction and safe to share
//! between threads; all mutable state lives on the [`SpanContext`].

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod baggage;
pub mod carrier;
pub mod config;
pub mod context;
mod error;
pub mod propagator;
mod sanitize;
mod tags;
mod trace_id;

pub use carrier::{Carrier, TextMapReader, TextMapWriter};
pub use config::{new_propagator, PropagatorConfig, TracePropagationStyle};
pub use context::{priority, SamplerSource, SpanContext, SpanLink};
pub use error::Error;
pub use propagator::{
    B3Propagator, B3SingleHeaderPropagator, BaggagePropagator, ChainedPropagator,
    DatadogPropagator, Propagator, TraceContextPropagator,
};
pub use trace_id::TraceId;
