//! Zipkin B3 propagation, in both the multi-header and the single-header
//! flavors.
//!
//! Trace ids are hex encoded, 16 digits for 64-bit ids and 32 for 128-bit
//! ones; span ids are 16 hex digits. The sampling decision collapses to
//! `1` for priorities at auto-keep or above and `0` otherwise.

use crate::carrier::{TextMapReader, TextMapWriter};
use crate::config::TracePropagationStyle;
use crate::context::priority::{AUTO_KEEP, AUTO_REJECT};
use crate::context::{SamplerSource, SpanContext};
use crate::propagator::Propagator;
use crate::trace_id::TraceId;
use crate::Error;

pub(crate) const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
pub(crate) const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
pub(crate) const B3_SAMPLED_HEADER: &str = "x-b3-sampled";
pub(crate) const B3_SINGLE_HEADER: &str = "b3";

fn b3_trace_id_hex(ctx: &SpanContext) -> String {
    if ctx.trace_id().has_upper() {
        ctx.trace_id().hex_encoded()
    } else {
        format!("{:016x}", ctx.trace_id().lower())
    }
}

/// Injects and extracts span contexts using the multi-header B3 format.
#[derive(Debug, Default)]
pub struct B3Propagator {
    _private: (),
}

impl B3Propagator {
    /// Creates a new multi-header B3 propagator.
    pub fn new() -> Self {
        B3Propagator::default()
    }
}

impl Propagator for B3Propagator {
    fn inject(&self, ctx: &SpanContext, writer: &mut dyn TextMapWriter) -> Result<(), Error> {
        if ctx.trace_id().is_empty() || ctx.span_id() == 0 {
            return Err(Error::InvalidSpanContext);
        }
        writer.set(B3_TRACE_ID_HEADER, &b3_trace_id_hex(ctx));
        writer.set(B3_SPAN_ID_HEADER, &format!("{:016x}", ctx.span_id()));
        if let Some(p) = ctx.sampling_priority() {
            writer.set(B3_SAMPLED_HEADER, if p >= AUTO_KEEP { "1" } else { "0" });
        }
        Ok(())
    }

    fn extract(&self, reader: &dyn TextMapReader) -> Result<SpanContext, Error> {
        let mut ctx = SpanContext::new();
        reader.for_each(&mut |k, v| {
            match k.to_lowercase().as_str() {
                B3_TRACE_ID_HEADER => {
                    // a malformed trace id is ignored, leaving the context
                    // empty rather than failing the extraction
                    if let Ok(id) = TraceId::from_hex(v) {
                        *ctx.trace_id_mut() = id;
                    }
                }
                B3_SPAN_ID_HEADER => {
                    ctx.set_span_id(
                        u64::from_str_radix(v, 16).map_err(|_| Error::Corrupted)?,
                    );
                }
                B3_SAMPLED_HEADER => {
                    let p = v.parse::<i32>().map_err(|_| Error::Corrupted)?;
                    ctx.init_sampling_priority(p, SamplerSource::Unknown);
                }
                _ => {}
            }
            Ok(())
        })?;
        if ctx.trace_id().is_empty() || ctx.span_id() == 0 {
            return Err(Error::NotFound);
        }
        ctx.set_remote(true);
        Ok(ctx)
    }

    fn style(&self) -> TracePropagationStyle {
        TracePropagationStyle::B3Multi
    }
}

/// Injects and extracts span contexts using the single `b3` header,
/// `{trace_id}-{span_id}[-{sampling_state}]`.
#[derive(Debug, Default)]
pub struct B3SingleHeaderPropagator {
    _private: (),
}

impl B3SingleHeaderPropagator {
    /// Creates a new single-header B3 propagator.
    pub fn new() -> Self {
        B3SingleHeaderPropagator::default()
    }
}

impl Propagator for B3SingleHeaderPropagator {
    fn inject(&self, ctx: &SpanContext, writer: &mut dyn TextMapWriter) -> Result<(), Error> {
        if ctx.trace_id().is_empty() || ctx.span_id() == 0 {
            return Err(Error::InvalidSpanContext);
        }
        let mut value = format!("{}-{:016x}", b3_trace_id_hex(ctx), ctx.span_id());
        if let Some(p) = ctx.sampling_priority() {
            value.push_str(if p >= AUTO_KEEP { "-1" } else { "-0" });
        }
        writer.set(B3_SINGLE_HEADER, &value);
        Ok(())
    }

    fn extract(&self, reader: &dyn TextMapReader) -> Result<SpanContext, Error> {
        let mut ctx = SpanContext::new();
        reader.for_each(&mut |k, v| {
            if k.to_lowercase() != B3_SINGLE_HEADER {
                return Ok(());
            }
            let parts: Vec<&str> = v.split('-').collect();
            if parts.len() < 2 {
                return Err(Error::Corrupted);
            }
            *ctx.trace_id_mut() = TraceId::from_hex(parts[0])?;
            ctx.set_span_id(u64::from_str_radix(parts[1], 16).map_err(|_| Error::Corrupted)?);
            if let Some(&flag) = parts.get(2) {
                match flag {
                    "" => {}
                    // debug traces are treated as kept
                    "1" | "d" => ctx.init_sampling_priority(AUTO_KEEP, SamplerSource::Unknown),
                    "0" => ctx.init_sampling_priority(AUTO_REJECT, SamplerSource::Unknown),
                    _ => return Err(Error::Corrupted),
                }
            }
            Ok(())
        })?;
        if ctx.trace_id().is_empty() || ctx.span_id() == 0 {
            return Err(Error::NotFound);
        }
        ctx.set_remote(true);
        Ok(ctx)
    }

    fn style(&self) -> TracePropagationStyle {
        TracePropagationStyle::B3SingleHeader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn extract_multi(headers: &[(&str, &str)]) -> Result<SpanContext, Error> {
        let map: HashMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        B3Propagator::new().extract(&map)
    }

    fn extract_single(value: &str) -> Result<SpanContext, Error> {
        let mut map = HashMap::new();
        map.insert(B3_SINGLE_HEADER.to_string(), value.to_string());
        B3SingleHeaderPropagator::new().extract(&map)
    }

    #[rustfmt::skip]
    fn multi_extract_data() -> Vec<((&'static str, &'static str, Option<&'static str>), u64, u64, u64, Option<i32>)> {
        // (trace id, span id, sampled), upper, lower, span id, priority
        vec![
            (("4bf92f3577b34da6", "00f067aa0ba902b7", None), 0, 0x4bf9_2f35_77b3_4da6, 0x00f0_67aa_0ba9_02b7, None),
            (("4bf92f3577b34da6", "00f067aa0ba902b7", Some("1")), 0, 0x4bf9_2f35_77b3_4da6, 0x00f0_67aa_0ba9_02b7, Some(1)),
            (("4bf92f3577b34da6", "00f067aa0ba902b7", Some("0")), 0, 0x4bf9_2f35_77b3_4da6, 0x00f0_67aa_0ba9_02b7, Some(0)),
            (("640cfd8d00000000a3ce929d0e0e4736", "00f067aa0ba902b7", Some("2")), 0x640c_fd8d_0000_0000, 0xa3ce_929d_0e0e_4736, 0x00f0_67aa_0ba9_02b7, Some(2)),
            // a 17 digit id spills one digit into the upper half
            (("20000000000000001", "00f067aa0ba902b7", None), 2, 1, 0x00f0_67aa_0ba9_02b7, None),
        ]
    }

    #[test]
    fn extract_multi_headers() {
        for ((trace_id, span_id, sampled), upper, lower, span, p) in multi_extract_data() {
            let mut headers = vec![
                (B3_TRACE_ID_HEADER, trace_id),
                (B3_SPAN_ID_HEADER, span_id),
            ];
            if let Some(sampled) = sampled {
                headers.push((B3_SAMPLED_HEADER, sampled));
            }
            let ctx = extract_multi(&headers).unwrap();
            assert_eq!(ctx.trace_id().upper(), upper, "{trace_id}");
            assert_eq!(ctx.trace_id().lower(), lower, "{trace_id}");
            assert_eq!(ctx.span_id(), span, "{trace_id}");
            assert_eq!(ctx.sampling_priority(), p, "{trace_id}");
            assert!(ctx.is_remote());
        }
    }

    #[test]
    fn extract_multi_malformed_trace_id_is_ignored() {
        assert_eq!(
            extract_multi(&[
                (B3_TRACE_ID_HEADER, "not-hex"),
                (B3_SPAN_ID_HEADER, "00f067aa0ba902b7"),
            ])
            .unwrap_err(),
            Error::NotFound
        );
    }

    #[test]
    fn extract_multi_malformed_span_or_sampled_is_corrupted() {
        assert_eq!(
            extract_multi(&[
                (B3_TRACE_ID_HEADER, "4bf92f3577b34da6"),
                (B3_SPAN_ID_HEADER, "not-hex"),
            ])
            .unwrap_err(),
            Error::Corrupted
        );
        assert_eq!(
            extract_multi(&[
                (B3_TRACE_ID_HEADER, "4bf92f3577b34da6"),
                (B3_SPAN_ID_HEADER, "00f067aa0ba902b7"),
                (B3_SAMPLED_HEADER, "true"),
            ])
            .unwrap_err(),
            Error::Corrupted
        );
    }

    #[test]
    fn extract_multi_missing_identity_is_not_found() {
        assert_eq!(extract_multi(&[]).unwrap_err(), Error::NotFound);
        assert_eq!(
            extract_multi(&[(B3_SAMPLED_HEADER, "1")]).unwrap_err(),
            Error::NotFound
        );
    }

    #[test]
    fn inject_multi_hex_widths() {
        let mut ctx = SpanContext::new();
        ctx.set_trace_id(crate::TraceId::from_parts(0, 0x4bf9_2f35_77b3_4da6));
        ctx.set_span_id(0x00f0_67aa_0ba9_02b7);
        ctx.init_sampling_priority(2, SamplerSource::Manual);

        let mut headers = HashMap::new();
        B3Propagator::new().inject(&ctx, &mut headers).unwrap();
        assert_eq!(
            headers.get(B3_TRACE_ID_HEADER).map(String::as_str),
            Some("4bf92f3577b34da6")
        );
        assert_eq!(
            headers.get(B3_SPAN_ID_HEADER).map(String::as_str),
            Some("00f067aa0ba902b7")
        );
        assert_eq!(headers.get(B3_SAMPLED_HEADER).map(String::as_str), Some("1"));

        let mut ctx = SpanContext::new();
        ctx.set_trace_id(crate::TraceId::from_parts(0x640c_fd8d_0000_0000, 1));
        ctx.set_span_id(1);
        ctx.init_sampling_priority(-1, SamplerSource::Manual);

        let mut headers = HashMap::new();
        B3Propagator::new().inject(&ctx, &mut headers).unwrap();
        assert_eq!(
            headers.get(B3_TRACE_ID_HEADER).map(String::as_str),
            Some("640cfd8d000000000000000000000001")
        );
        assert_eq!(headers.get(B3_SAMPLED_HEADER).map(String::as_str), Some("0"));
    }

    #[test]
    fn inject_multi_omits_sampled_without_priority() {
        let mut ctx = SpanContext::new();
        ctx.set_trace_id(crate::TraceId::from_parts(0, 1));
        ctx.set_span_id(1);

        let mut headers = HashMap::new();
        B3Propagator::new().inject(&ctx, &mut headers).unwrap();
        assert!(!headers.contains_key(B3_SAMPLED_HEADER));
    }

    #[rustfmt::skip]
    fn single_extract_data() -> Vec<(&'static str, u64, u64, Option<i32>)> {
        // header, lower, span id, priority
        vec![
            ("4bf92f3577b34da6-00f067aa0ba902b7", 0x4bf9_2f35_77b3_4da6, 0x00f0_67aa_0ba9_02b7, None),
            ("4bf92f3577b34da6-00f067aa0ba902b7-1", 0x4bf9_2f35_77b3_4da6, 0x00f0_67aa_0ba9_02b7, Some(1)),
            ("4bf92f3577b34da6-00f067aa0ba902b7-d", 0x4bf9_2f35_77b3_4da6, 0x00f0_67aa_0ba9_02b7, Some(1)),
            ("4bf92f3577b34da6-00f067aa0ba902b7-0", 0x4bf9_2f35_77b3_4da6, 0x00f0_67aa_0ba9_02b7, Some(0)),
            // a trailing parent span id segment is ignored
            ("4bf92f3577b34da6-00f067aa0ba902b7-1-00000000000000cd", 0x4bf9_2f35_77b3_4da6, 0x00f0_67aa_0ba9_02b7, Some(1)),
        ]
    }

    #[test]
    fn extract_single_header() {
        for (header, lower, span, p) in single_extract_data() {
            let ctx = extract_single(header).unwrap();
            assert_eq!(ctx.trace_id().lower(), lower, "{header}");
            assert_eq!(ctx.span_id(), span, "{header}");
            assert_eq!(ctx.sampling_priority(), p, "{header}");
        }
    }

    #[test]
    fn extract_single_malformed_is_corrupted() {
        for header in ["", "-", "0", "xyz-00f067aa0ba902b7", "4bf92f3577b34da6-xyz",
                       "4bf92f3577b34da6-00f067aa0ba902b7-q"] {
            assert_eq!(
                extract_single(header).unwrap_err(),
                Error::Corrupted,
                "{header:?}"
            );
        }
    }

    #[test]
    fn extract_single_missing_header_is_not_found() {
        let map: HashMap<String, String> = HashMap::new();
        assert_eq!(
            B3SingleHeaderPropagator::new().extract(&map).unwrap_err(),
            Error::NotFound
        );
    }

    #[test]
    fn inject_single_header() {
        let mut ctx = SpanContext::new();
        ctx.set_trace_id(crate::TraceId::from_parts(0, 0x4bf9_2f35_77b3_4da6));
        ctx.set_span_id(0x00f0_67aa_0ba9_02b7);
        ctx.init_sampling_priority(1, SamplerSource::Unknown);

        let mut headers = HashMap::new();
        B3SingleHeaderPropagator::new()
            .inject(&ctx, &mut headers)
            .unwrap();
        assert_eq!(
            headers.get(B3_SINGLE_HEADER).map(String::as_str),
            Some("4bf92f3577b34da6-00f067aa0ba902b7-1")
        );
    }

    #[test]
    fn inject_single_header_omits_flag_without_priority() {
        let mut ctx = SpanContext::new();
        ctx.set_trace_id(crate::TraceId::from_parts(0, 0x4bf9_2f35_77b3_4da6));
        ctx.set_span_id(0x00f0_67aa_0ba9_02b7);

        let mut headers = HashMap::new();
        B3SingleHeaderPropagator::new()
            .inject(&ctx, &mut headers)
            .unwrap();
        assert_eq!(
            headers.get(B3_SINGLE_HEADER).map(String::as_str),
            Some("4bf92f3577b34da6-00f067aa0ba902b7")
        );
    }
}
