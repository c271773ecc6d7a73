//! Propagation formats and the chain that orchestrates them.
//!
//! Each wire format implements [`Propagator`]. A [`ChainedPropagator`]
//! applies an ordered list of them: on inject every format writes into the
//! same carrier; on extract the first format that produces a valid context
//! wins, later formats refine it (the W3C extractor may adopt a
//! conflicting span id and contribute its tracestate) or, when they
//! disagree on the trace id entirely, leave a span link behind.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

mod b3;
mod baggage;
mod datadog;
pub(crate) mod trace_context;

pub use b3::{B3Propagator, B3SingleHeaderPropagator};
pub use baggage::BaggagePropagator;
pub use datadog::DatadogPropagator;
pub use trace_context::TraceContextPropagator;

use crate::carrier::{Carrier, HeaderReader, HeaderWriter, TextMapReader, TextMapWriter};
use crate::config::TracePropagationStyle;
use crate::context::{SpanContext, SpanLink};
use crate::propagator::trace_context::propagate_tracestate;
use crate::Error;

/// A single wire format able to write span contexts into and read them out
/// of a carrier.
pub trait Propagator: fmt::Debug + Send + Sync {
    /// Writes the context into the carrier.
    fn inject(&self, ctx: &SpanContext, writer: &mut dyn TextMapWriter) -> Result<(), Error>;

    /// Reads a context out of the carrier.
    fn extract(&self, reader: &dyn TextMapReader) -> Result<SpanContext, Error>;

    /// The wire format this propagator speaks, used for selection and for
    /// span-link attribution.
    fn style(&self) -> TracePropagationStyle;
}

/// An ordered list of injectors and extractors applied as one propagator.
///
/// Instances are immutable after construction and safe to share across
/// threads; build one at tracer start with
/// [`new_propagator`](crate::config::new_propagator) and pass it to every
/// inject and extract call.
#[derive(Debug)]
pub struct ChainedPropagator {
    injectors: Vec<Arc<dyn Propagator>>,
    extractors: Vec<Arc<dyn Propagator>>,
    injector_names: String,
    extractor_names: String,
    extract_first: bool,
}

impl ChainedPropagator {
    pub(crate) fn new(
        injectors: Vec<Arc<dyn Propagator>>,
        extractors: Vec<Arc<dyn Propagator>>,
        injector_names: String,
        extractor_names: String,
        extract_first: bool,
    ) -> Self {
        ChainedPropagator {
            injectors,
            extractors,
            injector_names,
            extractor_names,
            extract_first,
        }
    }

    /// Builds a chain that uses the same propagators, in order, for both
    /// directions.
    pub fn with_propagators(propagators: Vec<Arc<dyn Propagator>>) -> Self {
        let names = propagators
            .iter()
            .map(|p| p.style().to_string())
            .collect::<Vec<_>>()
            .join(",");
        ChainedPropagator {
            injectors: propagators.clone(),
            extractors: propagators,
            injector_names: names.clone(),
            extractor_names: names,
            extract_first: false,
        }
    }

    /// Comma separated names of the configured injectors.
    pub fn injector_names(&self) -> &str {
        &self.injector_names
    }

    /// Comma separated names of the configured extractors.
    pub fn extractor_names(&self) -> &str {
        &self.extractor_names
    }

    /// Whether the chain returns the first extractor's result as-is.
    pub fn extract_first(&self) -> bool {
        self.extract_first
    }

    /// Writes the context into the carrier with every configured injector,
    /// in order, sharing the carrier. The first failure short-circuits.
    pub fn inject(&self, ctx: &SpanContext, carrier: &mut Carrier<'_>) -> Result<(), Error> {
        match carrier {
            Carrier::Writer(writer) => self.inject_text_map(ctx, &mut **writer),
            Carrier::HttpHeaders(headers) => {
                self.inject_text_map(ctx, &mut HeaderWriter(&mut **headers))
            }
            Carrier::Reader(_) => Err(Error::InvalidCarrier),
        }
    }

    fn inject_text_map(
        &self,
        ctx: &SpanContext,
        writer: &mut dyn TextMapWriter,
    ) -> Result<(), Error> {
        if ctx.trace_id().is_empty() || ctx.span_id() == 0 {
            return Err(Error::InvalidSpanContext);
        }
        for injector in &self.injectors {
            injector.inject(ctx, writer)?;
        }
        Ok(())
    }

    /// Reads a context out of the carrier, walking the configured
    /// extractors in order and reconciling their results.
    pub fn extract(&self, carrier: &Carrier<'_>) -> Result<SpanContext, Error> {
        match carrier {
            Carrier::Reader(reader) => self.extract_text_map(*reader),
            Carrier::HttpHeaders(headers) => self.extract_text_map(&HeaderReader(&**headers)),
            Carrier::Writer(_) => Err(Error::InvalidCarrier),
        }
    }

    fn extract_text_map(&self, reader: &dyn TextMapReader) -> Result<SpanContext, Error> {
        let mut ctx: Option<SpanContext> = None;
        let mut links: Vec<SpanLink> = Vec::new();
        let mut pending_baggage: Vec<(String, String)> = Vec::new();

        for extractor in &self.extractors {
            // The baggage format only contributes items; it never becomes
            // the winning context.
            if extractor.style() == TracePropagationStyle::Baggage {
                if let Ok(extracted) = extractor.extract(reader) {
                    extracted.for_each_baggage_item(|k, v| {
                        match pending_baggage.iter().position(|(key, _)| key == k) {
                            Some(i) => pending_baggage[i].1 = v.to_owned(),
                            None => pending_baggage.push((k.to_owned(), v.to_owned())),
                        }
                        true
                    });
                }
                continue;
            }

            let result = extractor.extract(reader);
            if ctx.is_none() {
                if self.extract_first {
                    return result;
                }
                match result {
                    Ok(extracted) => ctx = Some(extracted),
                    // keep walking, a later extractor may find one
                    Err(Error::NotFound) => {}
                    Err(err) => return Err(err),
                }
                continue;
            }
            // a context already won; later formats refine it or get linked
            let Ok(extracted) = result else { continue };
            let Some(winner) = ctx.as_mut() else { continue };
            if extracted.trace_id() == winner.trace_id() {
                if extractor.style() == TracePropagationStyle::TraceContext {
                    propagate_tracestate(winner, &extracted);
                    if extracted.span_id() != winner.span_id() {
                        override_parent_id(winner, &extracted);
                    }
                }
            } else {
                links.push(SpanLink::terminated_context(&extracted, extractor.style()));
            }
        }

        let Some(mut ctx) = ctx else {
            if !pending_baggage.is_empty() {
                let mut ctx = SpanContext::new();
                for (key, value) in pending_baggage {
                    ctx.set_baggage_item(key, value);
                }
                ctx.set_baggage_only(true);
                return Ok(ctx);
            }
            return Err(Error::NotFound);
        };
        for (key, value) in pending_baggage {
            ctx.set_baggage_item(key, value);
        }
        if !links.is_empty() {
            ctx.set_span_links(links);
        }
        debug!(
            trace_id = %ctx.trace_id(),
            span_id = ctx.span_id(),
            origin = ctx.origin(),
            has_baggage = ctx.has_baggage(),
            baggage_count = ctx.baggage_len(),
            "extracted span context"
        );
        Ok(ctx)
    }
}

/// Adopts the span id claimed by the W3C headers when it disagrees with
/// the winning context. The displaced id becomes the reparenting hint
/// unless the W3C context carried its own.
fn override_parent_id(ctx: &mut SpanContext, w3c: &SpanContext) {
    let displaced = ctx.span_id();
    ctx.set_span_id(w3c.span_id());
    if w3c.reparent_id().is_empty() {
        ctx.set_reparent_id(format!("{displaced:016x}"));
    } else {
        let reparent_id = w3c.reparent_id().to_owned();
        ctx.set_reparent_id(reparent_id);
    }
}
