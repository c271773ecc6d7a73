//! Codec for the W3C `baggage` header.
//!
//! Keys and values are percent-encoded against per-field safe sets and
//! joined as `k=v` pairs with commas. Encoding is bounded by an item count
//! and a byte budget; overflow is dropped silently. Decoding is
//! all-or-nothing: one malformed pair discards the whole header.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::warn;

use crate::context::SpanContext;

/// Most baggage items a single header will carry.
pub(crate) const BAGGAGE_MAX_ITEMS: usize = 64;

/// Byte budget for the encoded header.
pub(crate) const BAGGAGE_MAX_BYTES: usize = 8192;

// Everything outside the per-field safe set is percent-encoded. The safe
// sets are alphanumerics plus the punctuation listed here.
const KEY_ESCAPED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'%')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'*')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

const VALUE_ESCAPED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'%')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'/')
    .remove(b':')
    .remove(b'<')
    .remove(b'>')
    .remove(b'?')
    .remove(b'@')
    .remove(b'[')
    .remove(b']')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'{')
    .remove(b'|')
    .remove(b'}')
    .remove(b'~');

/// Serializes the context's baggage to a single header value, stopping at
/// the item and byte caps.
pub(crate) fn encode_baggage(ctx: &SpanContext) -> String {
    let mut out = String::new();
    let mut count = 0usize;
    ctx.for_each_baggage_item(|k, v| {
        if count >= BAGGAGE_MAX_ITEMS {
            warn!(limit = BAGGAGE_MAX_ITEMS, "baggage item limit reached, dropping excess items");
            return false;
        }
        let mut item = String::new();
        if count > 0 {
            item.push(',');
        }
        item.push_str(&utf8_percent_encode(k.trim(), KEY_ESCAPED).to_string());
        item.push('=');
        item.push_str(&utf8_percent_encode(v.trim(), VALUE_ESCAPED).to_string());
        if out.len() + item.len() > BAGGAGE_MAX_BYTES {
            warn!(limit = BAGGAGE_MAX_BYTES, "baggage byte limit reached, dropping excess items");
            return false;
        }
        out.push_str(&item);
        count += 1;
        true
    });
    out
}

/// Parses a baggage header into ordered pairs. A pair missing its `=`, key
/// or value discards the entire header.
pub(crate) fn decode_baggage(header: &str) -> Vec<(String, String)> {
    let mut trimmed = Vec::new();
    for item in header.split(',') {
        let Some((key, value)) = item.split_once('=') else {
            warn!("invalid baggage item, dropping entire header");
            return Vec::new();
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            warn!("invalid baggage item, dropping entire header");
            return Vec::new();
        }
        trimmed.push((key, value));
    }
    trimmed
        .into_iter()
        .map(|(k, v)| {
            (
                percent_decode_str(k).decode_utf8_lossy().into_owned(),
                percent_decode_str(v).decode_utf8_lossy().into_owned(),
            )
        })
        .collect()
}
