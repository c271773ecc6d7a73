//! The standalone baggage propagator.
//!
//! Carries only the `baggage` header. Extraction never produces trace
//! identity; when this is the only format that yields data, the chain
//! returns a baggage-only context.

use crate::baggage::{decode_baggage, encode_baggage};
use crate::carrier::{TextMapReader, TextMapWriter};
use crate::config::TracePropagationStyle;
use crate::context::SpanContext;
use crate::propagator::Propagator;
use crate::Error;

pub(crate) const BAGGAGE_HEADER: &str = "baggage";

/// Injects and extracts baggage items using the W3C `baggage` header.
#[derive(Debug, Default)]
pub struct BaggagePropagator {
    _private: (),
}

impl BaggagePropagator {
    /// Creates a new baggage propagator.
    pub fn new() -> Self {
        BaggagePropagator::default()
    }
}

impl Propagator for BaggagePropagator {
    fn inject(&self, ctx: &SpanContext, writer: &mut dyn TextMapWriter) -> Result<(), Error> {
        let header = encode_baggage(ctx);
        if !header.is_empty() {
            writer.set(BAGGAGE_HEADER, &header);
        }
        Ok(())
    }

    fn extract(&self, reader: &dyn TextMapReader) -> Result<SpanContext, Error> {
        let mut header = String::new();
        reader.for_each(&mut |k, v| {
            if k.to_lowercase() == BAGGAGE_HEADER {
                header = v.to_owned();
            }
            Ok(())
        })?;
        let ctx = SpanContext::new();
        if header.is_empty() {
            return Ok(ctx);
        }
        for (key, value) in decode_baggage(&header) {
            ctx.set_baggage_item(key, value);
        }
        Ok(ctx)
    }

    fn style(&self) -> TracePropagationStyle {
        TracePropagationStyle::Baggage
    }
}
