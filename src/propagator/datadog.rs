//! The Datadog multi-header propagation format.
//!
//! Five logical fields travel over well-known headers: the lower half of
//! the trace id and the span id as decimal, the sampling priority, the
//! origin, and the propagated trace tags. The upper half of a 128-bit
//! trace id rides inside the tag header as `_dd.p.tid`. Baggage items use
//! an OpenTracing-style per-item header prefix.

use std::sync::Arc;

use tracing::debug;

use crate::carrier::{TextMapReader, TextMapWriter};
use crate::config::{PropagatorConfig, TracePropagationStyle, ORIGIN_HEADER, TRACE_TAGS_HEADER};
use crate::context::{SamplerSource, SpanContext, KEY_TRACE_ID_128};
use crate::propagator::Propagator;
use crate::tags::{marshal_propagating_tags, unmarshal_propagating_tags};
use crate::trace_id::is_valid_id;
use crate::Error;

/// Injects and extracts span contexts using Datadog headers.
#[derive(Debug)]
pub struct DatadogPropagator {
    cfg: Arc<PropagatorConfig>,
}

impl DatadogPropagator {
    /// Creates a Datadog propagator over the given header configuration.
    pub fn new(cfg: Arc<PropagatorConfig>) -> Self {
        DatadogPropagator { cfg }
    }
}

impl Propagator for DatadogPropagator {
    fn inject(&self, ctx: &SpanContext, writer: &mut dyn TextMapWriter) -> Result<(), Error> {
        if ctx.trace_id().is_empty() || ctx.span_id() == 0 {
            return Err(Error::InvalidSpanContext);
        }
        if ctx.trace_id().has_upper() {
            ctx.put_propagating_tag(KEY_TRACE_ID_128, ctx.trace_id().upper_hex());
        } else {
            ctx.unset_propagating_tag(KEY_TRACE_ID_128);
        }
        writer.set(&self.cfg.trace_header, &ctx.trace_id().lower().to_string());
        writer.set(&self.cfg.parent_header, &ctx.span_id().to_string());
        if let Some(p) = ctx.sampling_priority() {
            writer.set(&self.cfg.priority_header, &p.to_string());
        }
        if !ctx.origin().is_empty() {
            writer.set(ORIGIN_HEADER, ctx.origin());
        }
        ctx.for_each_baggage_item(|k, v| {
            writer.set(&format!("{}{}", self.cfg.baggage_prefix, k), v);
            true
        });
        if self.cfg.max_tags_header_len == 0 {
            return Ok(());
        }
        let (tags, fault) = marshal_propagating_tags(ctx, self.cfg.max_tags_header_len);
        if let Some(fault) = fault {
            ctx.set_propagation_error(fault);
        }
        if !tags.is_empty() {
            writer.set(TRACE_TAGS_HEADER, &tags);
        }
        Ok(())
    }

    fn extract(&self, reader: &dyn TextMapReader) -> Result<SpanContext, Error> {
        let mut ctx = SpanContext::new();
        reader.for_each(&mut |k, v| {
            let key = k.to_lowercase();
            if key == self.cfg.trace_header {
                let lower = v.parse::<u64>().map_err(|_| Error::Corrupted)?;
                ctx.trace_id_mut().set_lower(lower);
            } else if key == self.cfg.parent_header {
                ctx.set_span_id(v.parse::<u64>().map_err(|_| Error::Corrupted)?);
            } else if key == self.cfg.priority_header {
                let p = v.parse::<i32>().map_err(|_| Error::Corrupted)?;
                ctx.init_sampling_priority(p, SamplerSource::Unknown);
            } else if key == ORIGIN_HEADER {
                ctx.set_origin(v);
            } else if key == TRACE_TAGS_HEADER {
                unmarshal_propagating_tags(&ctx, v);
            } else if let Some(item) = key.strip_prefix(&self.cfg.baggage_prefix) {
                ctx.set_baggage_item(item, v);
            }
            Ok(())
        })?;
        if let Some(tid) = ctx.propagating_tag(KEY_TRACE_ID_128) {
            if tid.len() != 16 || !is_valid_id(&tid) {
                debug!(tid = tid.as_str(), "invalid 128-bit trace id tag, dropping it");
                ctx.unset_propagating_tag(KEY_TRACE_ID_128);
            } else if ctx.trace_id_mut().set_upper_from_hex(&tid).is_err() {
                debug!(tid = tid.as_str(), "unparsable 128-bit trace id tag, dropping it");
                ctx.unset_propagating_tag(KEY_TRACE_ID_128);
            }
        }
        // synthetics traffic arrives with an origin but no parent span
        if ctx.trace_id().is_empty() || (ctx.span_id() == 0 && ctx.origin() != "synthetics") {
            return Err(Error::NotFound);
        }
        ctx.set_remote(true);
        Ok(ctx)
    }

    fn style(&self) -> TracePropagationStyle {
        TracePropagationStyle::Datadog
    }
}
