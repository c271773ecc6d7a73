//! W3C trace context propagation: the `traceparent` and `tracestate`
//! headers.
//!
//! `traceparent` carries the binary-exact trace identity; `tracestate`
//! carries vendor-specific state as a comma separated list of at most 32
//! members. This library owns the `dd=` member, a semicolon separated list
//! of shortened keys: `s` for the sampling priority, `o` for the origin,
//! `p` for the last parent id and `t.<suffix>` for `_dd.p.<suffix>`
//! propagating tags. Other vendors' members are preserved verbatim.

use crate::carrier::{TextMapReader, TextMapWriter};
use crate::config::{TracePropagationStyle, DEFAULT_BAGGAGE_HEADER_PREFIX};
use crate::context::priority::{AUTO_KEEP, AUTO_REJECT};
use crate::context::{SamplerSource, SpanContext, KEY_DECISION_MAKER, KEY_TRACE_ID_128};
use crate::propagator::Propagator;
use crate::sanitize::{sanitize_key, sanitize_origin, sanitize_value};
use crate::trace_id::{is_valid_id, TraceId};
use crate::Error;

pub(crate) const TRACEPARENT_HEADER: &str = "traceparent";
pub(crate) const TRACESTATE_HEADER: &str = "tracestate";

/// Injects and extracts span contexts using the W3C trace context headers.
#[derive(Debug, Default)]
pub struct TraceContextPropagator {
    _private: (),
}

impl TraceContextPropagator {
    /// Creates a new W3C trace context propagator.
    pub fn new() -> Self {
        TraceContextPropagator::default()
    }
}

impl Propagator for TraceContextPropagator {
    fn inject(&self, ctx: &SpanContext, writer: &mut dyn TextMapWriter) -> Result<(), Error> {
        if ctx.trace_id().is_empty() || ctx.span_id() == 0 {
            return Err(Error::InvalidSpanContext);
        }
        let sampling_priority = ctx.sampling_priority();
        let flags = if sampling_priority.is_some_and(|p| p >= AUTO_KEEP) {
            "01"
        } else {
            "00"
        };
        let trace_id = if ctx.trace_id().has_upper() {
            ctx.put_propagating_tag(KEY_TRACE_ID_128, ctx.trace_id().upper_hex());
            ctx.trace_id().hex_encoded()
        } else {
            ctx.unset_propagating_tag(KEY_TRACE_ID_128);
            format!("{:032x}", ctx.trace_id().lower())
        };
        writer.set(
            TRACEPARENT_HEADER,
            &format!("00-{}-{:016x}-{}", trace_id, ctx.span_id(), flags),
        );
        // The cached tracestate can only be re-emitted when nothing that
        // feeds the dd= member moved since extraction.
        let cached = ctx.propagating_tag(TRACESTATE_HEADER).unwrap_or_default();
        if ctx.updated()
            || !ctx.is_remote()
            || !cached.starts_with("dd=")
            || ctx.propagating_tags_len() == 0
        {
            writer.set(
                TRACESTATE_HEADER,
                &compose_tracestate(ctx, sampling_priority.unwrap_or(0), &cached),
            );
        } else {
            writer.set(TRACESTATE_HEADER, &cached);
        }
        Ok(())
    }

    fn extract(&self, reader: &dyn TextMapReader) -> Result<SpanContext, Error> {
        let mut ctx = SpanContext::new();
        let mut traceparent: Option<String> = None;
        let mut tracestate: Option<String> = None;
        reader.for_each(&mut |k, v| {
            let key = k.to_lowercase();
            match key.as_str() {
                TRACEPARENT_HEADER => {
                    if traceparent.is_some() {
                        return Err(Error::Corrupted);
                    }
                    traceparent = Some(v.to_owned());
                }
                TRACESTATE_HEADER => tracestate = Some(v.to_owned()),
                _ => {
                    if let Some(item) = key.strip_prefix(DEFAULT_BAGGAGE_HEADER_PREFIX) {
                        ctx.set_baggage_item(item, v);
                    }
                }
            }
            Ok(())
        })?;
        parse_traceparent(&mut ctx, traceparent.as_deref().unwrap_or(""))?;
        parse_tracestate(&mut ctx, tracestate.as_deref().unwrap_or(""));
        ctx.set_remote(true);
        Ok(ctx)
    }

    fn style(&self) -> TracePropagationStyle {
        TracePropagationStyle::TraceContext
    }
}

/// Adopts the tracestate of a W3C context extracted after `ctx` won the
/// chain, provided the trace ids match: the vendor portion is taken
/// verbatim, the `dd=` member is recomposed from `ctx`'s current state, and
/// the remote flag follows the W3C context.
pub(crate) fn propagate_tracestate(ctx: &mut SpanContext, w3c: &SpanContext) {
    if ctx.trace_id() != w3c.trace_id() {
        return;
    }
    let incoming = w3c.propagating_tag(TRACESTATE_HEADER).unwrap_or_default();
    let sampling_priority = ctx.sampling_priority().unwrap_or(0);
    let composed = compose_tracestate(ctx, sampling_priority, &incoming);
    ctx.put_propagating_tag(TRACESTATE_HEADER, composed);
    ctx.set_remote(w3c.is_remote());
}

fn trim_ws(s: &str) -> &str {
    s.trim_matches(|c| c == ' ' || c == '\t')
}

/// Parses the fixed-length `traceparent` header:
/// `version "-" trace-id "-" parent-id "-" flags`, two lowercase hex digits
/// of version, 32 of trace id, 16 of parent id and two of flags. Version 0
/// fixes the length at exactly 55; later versions may append `-`-separated
/// suffixes.
fn parse_traceparent(ctx: &mut SpanContext, header: &str) -> Result<(), Error> {
    let non_word = |c: char| matches!(c, '_' | '-' | '\t' | ' ' | '\n');
    let header = header
        .trim_matches(|c| c == '\t' || c == ' ' || c == '-')
        .to_lowercase();
    let header_len = header.len();
    if header_len == 0 {
        return Err(Error::NotFound);
    }
    if header_len < 55 {
        return Err(Error::Corrupted);
    }
    let parts: Vec<&str> = header.splitn(5, '-').collect();
    if parts.len() < 4 {
        return Err(Error::Corrupted);
    }

    let version = parts[0].trim_matches(non_word);
    if version.len() != 2 {
        return Err(Error::Corrupted);
    }
    let version = u64::from_str_radix(version, 16).map_err(|_| Error::Corrupted)?;
    if version == 255 {
        // version ff is forbidden by the specification
        return Err(Error::Corrupted);
    }
    if version == 0 && header_len != 55 {
        return Err(Error::Corrupted);
    }

    let full_trace_id = parts[1].trim_matches(non_word);
    if full_trace_id.len() != 32 || !is_valid_id(full_trace_id) {
        return Err(Error::Corrupted);
    }
    // the 128-bit tag is rebuilt from the parsed id, never inherited
    ctx.unset_propagating_tag(KEY_TRACE_ID_128);
    *ctx.trace_id_mut() = TraceId::from_hex(full_trace_id)?;

    let span_id = parts[2].trim_matches(non_word);
    if span_id.len() != 16 || !is_valid_id(span_id) {
        return Err(Error::Corrupted);
    }
    ctx.set_span_id(u64::from_str_radix(span_id, 16).map_err(|_| Error::Corrupted)?);
    if ctx.span_id() == 0 {
        return Err(Error::NotFound);
    }

    let flags = i8::from_str_radix(parts[3], 16).map_err(|_| Error::Corrupted)?;
    ctx.init_sampling_priority(i32::from(flags & 0x1), SamplerSource::Unknown);
    Ok(())
}

/// Parses the `tracestate` header. The whole header is stashed verbatim as
/// a propagating tag so the vendor portion survives re-injection; only the
/// `dd=` member is interpreted.
fn parse_tracestate(ctx: &mut SpanContext, header: &str) {
    if header.is_empty() {
        // tracestate may be absent; there is nothing to preserve
        return;
    }
    ctx.put_propagating_tag(TRACESTATE_HEADER, header);
    for member in trim_ws(header).split(',') {
        let Some(dd) = member.strip_prefix("dd=") else {
            continue;
        };
        let mut drop_decision_maker = false;
        for entry in dd.split(';') {
            let Some((key, value)) = entry.split_once(':') else {
                continue;
            };
            if key == "o" {
                ctx.set_origin(value.replace('~', "="));
            } else if key == "s" {
                let Ok(state_priority) = value.parse::<i32>() else {
                    // fall back to the priority derived from the
                    // traceparent sampled flag
                    continue;
                };
                let parent_priority = ctx.sampling_priority().unwrap_or(0);
                if (parent_priority == 1 && state_priority > 0)
                    || (parent_priority == 0 && state_priority <= 0)
                {
                    ctx.init_sampling_priority(state_priority, SamplerSource::Unknown);
                }
                if parent_priority == 1 && state_priority <= 0 {
                    ctx.init_sampling_priority(AUTO_KEEP, SamplerSource::Default);
                }
                if parent_priority == 0 && state_priority > 0 {
                    ctx.init_sampling_priority(AUTO_REJECT, SamplerSource::Unknown);
                    drop_decision_maker = true;
                }
            } else if key == "p" {
                ctx.set_reparent_id(value);
            } else if key.starts_with("t.dm") {
                if ctx.has_propagating_tag(KEY_DECISION_MAKER) || drop_decision_maker {
                    continue;
                }
                ctx.put_propagating_tag(KEY_DECISION_MAKER, value);
            } else if let Some(suffix) = key.strip_prefix("t.") {
                ctx.put_propagating_tag(format!("_dd.p.{suffix}"), value.replace('~', "="));
            }
        }
    }
}

/// Builds the `tracestate` header from the context: the `dd=` member first
/// (`s`, `o`, `p`, then `t.`-prefixed tags, capped at 256 characters), then
/// the surviving members of `old_state` up to 32 members total.
pub(crate) fn compose_tracestate(ctx: &SpanContext, sampling_priority: i32, old_state: &str) -> String {
    let mut out = String::with_capacity(128);
    out.push_str("dd=s:");
    out.push_str(&sampling_priority.to_string());
    let mut list_length = 1;

    if !ctx.origin().is_empty() {
        out.push_str(";o:");
        out.push_str(&sanitize_origin(ctx.origin()));
    }

    // `p` lets the backend rewire a stubbed parent: the local span id for a
    // local context, the reparenting hint for a remote one.
    if !ctx.is_remote() {
        out.push_str(";p:");
        out.push_str(&format!("{:016x}", ctx.span_id()));
    } else if !ctx.reparent_id().is_empty() {
        out.push_str(";p:");
        out.push_str(ctx.reparent_id());
    }

    ctx.for_each_propagating_tag(|k, v| {
        let Some(suffix) = k.strip_prefix("_dd.p.") else {
            return true;
        };
        let key = sanitize_key(suffix);
        let value = sanitize_value(v);
        // +4 covers the ";t." prefix and the ":" separator
        if out.len() + key.len() + value.len() + 4 > 256 {
            return false;
        }
        out.push_str(";t.");
        out.push_str(&key);
        out.push(':');
        out.push_str(&value);
        true
    });

    if old_state.is_empty() {
        return out;
    }
    for member in trim_ws(old_state).split(',') {
        if member.starts_with("dd=") {
            continue;
        }
        list_length += 1;
        // drop the rightmost members once the list would exceed 32
        if list_length > 32 {
            break;
        }
        out.push(',');
        out.push_str(trim_ws(member));
    }
    out
}
