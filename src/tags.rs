//! Codec for the propagated trace-tag header (`x-datadog-tags`).
//!
//! The wire form is `k1=v1,k2=v2,…`. Both directions are bounded and both
//! surface recoverable problems through the context's diagnostic slot
//! rather than failing the propagation.

use tracing::warn;

use crate::context::SpanContext;
use crate::propagator::trace_context::{TRACEPARENT_HEADER, TRACESTATE_HEADER};

/// Total size cap for an incoming trace-tag header.
pub(crate) const EXTRACT_MAX_SIZE: usize = 512;

/// Diagnostic values stored under `_dd.propagation_error`.
pub(crate) const ERR_ENCODING: &str = "encoding_error";
pub(crate) const ERR_INJECT_MAX_SIZE: &str = "inject_max_size";
pub(crate) const ERR_EXTRACT_MAX_SIZE: &str = "extract_max_size";
pub(crate) const ERR_DECODING: &str = "decoding_error";

/// Checks that a tag can travel in the trace-tag header: printable ASCII,
/// no `,` on either side, no `=` or space in the key.
pub(crate) fn is_valid_propagatable_tag(key: &str, value: &str) -> bool {
    if key.is_empty() || value.is_empty() {
        return false;
    }
    let key_ok = key
        .chars()
        .all(|c| ('\u{21}'..='\u{7e}').contains(&c) && c != ',' && c != '=');
    let value_ok = value
        .chars()
        .all(|c| ('\u{20}'..='\u{7e}').contains(&c) && c != ',');
    key_ok && value_ok
}

/// Serializes the context's propagating tags to the comma separated wire
/// form, dropping the W3C header stash and anything unpropagatable, and
/// clearing the whole output once `max_len` would be exceeded. Returns the
/// encoded header and the diagnostic to record, if any.
pub(crate) fn marshal_propagating_tags(
    ctx: &SpanContext,
    max_len: usize,
) -> (String, Option<&'static str>) {
    let mut out = String::new();
    let mut fault = None;
    ctx.for_each_propagating_tag(|k, v| {
        if k == TRACESTATE_HEADER || k == TRACEPARENT_HEADER {
            return true;
        }
        if !is_valid_propagatable_tag(k, v) {
            warn!(key = k, "won't propagate tag: invalid character");
            fault = Some(ERR_ENCODING);
            return true;
        }
        if out.len() + k.len() + v.len() > max_len {
            out.clear();
            warn!(
                limit = max_len,
                "won't propagate tags: header length exceeds the maximum"
            );
            fault = Some(ERR_INJECT_MAX_SIZE);
            return false;
        }
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        true
    });
    (out, fault)
}

/// Parses the strict `k=v,k=v` wire form. Values may contain `=`; only the
/// first `=` of a pair splits. Any malformed pair fails the whole parse.
pub(crate) fn parse_propagatable_tags(s: &str) -> Result<Vec<(String, String)>, ()> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let mut tags = Vec::new();
    for pair in s.split(',') {
        match pair.split_once('=') {
            Some((k, v)) if !k.is_empty() && !v.is_empty() => {
                tags.push((k.to_owned(), v.to_owned()));
            }
            _ => return Err(()),
        }
    }
    Ok(tags)
}

/// Decodes an incoming trace-tag header into the context, enforcing the
/// size cap. Decoding trouble never fails the extraction; it is recorded in
/// the diagnostic slot and the incoming tags are not propagated further.
pub(crate) fn unmarshal_propagating_tags(ctx: &SpanContext, header: &str) {
    if header.len() > EXTRACT_MAX_SIZE {
        warn!(
            size = header.len(),
            limit = EXTRACT_MAX_SIZE,
            "did not extract trace tags: size limit exceeded, incoming tags will not be propagated further"
        );
        ctx.set_propagation_error(ERR_EXTRACT_MAX_SIZE);
        return;
    }
    match parse_propagatable_tags(header) {
        Ok(tags) => ctx.replace_propagating_tags(tags),
        Err(()) => {
            warn!("did not extract trace tags: malformed header, incoming tags will not be propagated further");
            ctx.set_propagation_error(ERR_DECODING);
            ctx.replace_propagating_tags(Vec::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    fn valid_tag_data() -> Vec<(&'static str, &'static str, bool)> {
        vec![
            ("_dd.p.dm", "-4", true),
            ("_dd.p.usr.id", "baz64==", true),   // '=' allowed in values
            ("key", "v a l", true),              // space allowed in values
            ("k e y", "value", false),           // space not allowed in keys
            ("key,", "value", false),
            ("key=", "value", false),
            ("key", "val,ue", false),
            ("key", "välue", false),
            ("kéy", "value", false),
            ("", "value", false),
            ("key", "", false),
        ]
    }

    #[test]
    fn tag_validity() {
        for (k, v, want) in valid_tag_data() {
            assert_eq!(is_valid_propagatable_tag(k, v), want, "{k:?}={v:?}");
        }
    }

    #[test]
    fn parse_round_trip() {
        let ctx = SpanContext::new();
        ctx.put_propagating_tag("_dd.p.dm", "-4");
        ctx.put_propagating_tag("_dd.p.usr.id", "baz64");

        let (encoded, fault) = marshal_propagating_tags(&ctx, 128);
        assert_eq!(encoded, "_dd.p.dm=-4,_dd.p.usr.id=baz64");
        assert_eq!(fault, None);

        let decoded = parse_propagatable_tags(&encoded).unwrap();
        assert_eq!(
            decoded,
            vec![
                ("_dd.p.dm".to_owned(), "-4".to_owned()),
                ("_dd.p.usr.id".to_owned(), "baz64".to_owned()),
            ]
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        for s in ["a", "a=", "=b", "a=b,", "a=b,c", ",a=b", "a=b,,c=d"] {
            assert!(parse_propagatable_tags(s).is_err(), "{s:?}");
        }
        assert_eq!(parse_propagatable_tags("").unwrap(), Vec::new());
        // only the first '=' splits
        assert_eq!(
            parse_propagatable_tags("a=b=c").unwrap(),
            vec![("a".to_owned(), "b=c".to_owned())]
        );
    }

    #[test]
    fn marshal_skips_w3c_stash_and_invalid() {
        let ctx = SpanContext::new();
        ctx.put_propagating_tag("tracestate", "dd=s:1,foo=bar");
        ctx.put_propagating_tag("traceparent", "00-…-01");
        ctx.put_propagating_tag("_dd.p.bad", "a,b");
        ctx.put_propagating_tag("_dd.p.ok", "1");

        let (encoded, fault) = marshal_propagating_tags(&ctx, 128);
        assert_eq!(encoded, "_dd.p.ok=1");
        assert_eq!(fault, Some(ERR_ENCODING));
    }

    #[test]
    fn marshal_clears_on_overflow() {
        let ctx = SpanContext::new();
        ctx.put_propagating_tag("_dd.p.a", "x".repeat(40));
        ctx.put_propagating_tag("_dd.p.b", "y".repeat(40));

        let (encoded, fault) = marshal_propagating_tags(&ctx, 64);
        assert_eq!(encoded, "");
        assert_eq!(fault, Some(ERR_INJECT_MAX_SIZE));
    }

    #[test]
    fn unmarshal_respects_size_cap() {
        let ctx = SpanContext::new();
        let header = format!("_dd.p.big={}", "x".repeat(EXTRACT_MAX_SIZE));
        unmarshal_propagating_tags(&ctx, &header);
        assert_eq!(ctx.propagating_tags_len(), 0);
        assert_eq!(ctx.propagation_error(), Some(ERR_EXTRACT_MAX_SIZE));
    }

    #[test]
    fn unmarshal_flags_malformed() {
        let ctx = SpanContext::new();
        ctx.put_propagating_tag("_dd.p.old", "kept-until-replace");
        unmarshal_propagating_tags(&ctx, "_dd.p.a=1,broken");
        assert_eq!(ctx.propagating_tags_len(), 0);
        assert_eq!(ctx.propagation_error(), Some(ERR_DECODING));
    }

    #[test]
    fn unmarshal_replaces_tags() {
        let ctx = SpanContext::new();
        unmarshal_propagating_tags(&ctx, "_dd.p.dm=-4,_dd.p.tid=640cfd8d00000000");
        assert_eq!(ctx.propagating_tag("_dd.p.dm").as_deref(), Some("-4"));
        assert_eq!(
            ctx.propagating_tag("_dd.p.tid").as_deref(),
            Some("640cfd8d00000000")
        );
        assert_eq!(ctx.propagation_error(), None);
    }
}
