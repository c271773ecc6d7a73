//! Character-class sanitizers for the `dd=` tracestate list member.
//!
//! Each sanitizer is a streaming map over the input's characters. A class
//! function decides, per character, whether it passes through, is replaced,
//! or is replaced with the whole run of following out-of-range characters
//! collapsed into a single replacement. After sanitization the string only
//! contains characters the W3C tracestate grammar permits inside the `dd=`
//! member.

use std::borrow::Cow;

/// Per-character verdict: `None` keeps the character; `Some((r, collapse))`
/// replaces it with `r`, and with `collapse` set, swallows the immediately
/// following characters that fall in the same collapsing class.
type CharClass = fn(char) -> Option<(char, bool)>;

/// Tracestate keys: `,` and `=` become `_`; characters outside
/// `0x20..=0x7e` become `_` with runs collapsed.
fn key_disallowed(c: char) -> Option<(char, bool)> {
    match c {
        ',' | '=' => Some(('_', false)),
        c if c < '\u{20}' || c > '\u{7e}' => Some(('_', true)),
        _ => None,
    }
}

/// Tracestate values: `=` becomes `~`; `,`, `~` and `;` become `_`;
/// characters outside `0x20..=0x7e` become `_` with runs collapsed.
fn value_disallowed(c: char) -> Option<(char, bool)> {
    match c {
        '=' => Some(('~', false)),
        ',' | '~' | ';' => Some(('_', false)),
        c if c < '\u{20}' || c > '\u{7e}' => Some(('_', true)),
        _ => None,
    }
}

/// Origin values: like tracestate values, but space is also out of range
/// (`0x21..=0x7e`).
fn origin_disallowed(c: char) -> Option<(char, bool)> {
    match c {
        '=' => Some(('~', false)),
        ',' | '~' | ';' => Some(('_', false)),
        c if c < '\u{21}' || c > '\u{7e}' => Some(('_', true)),
        _ => None,
    }
}

fn sanitize(s: &str, class: CharClass) -> Cow<'_, str> {
    if s.chars().all(|c| class(c).is_none()) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for c in s.chars() {
        match class(c) {
            None => {
                in_run = false;
                out.push(c);
            }
            Some((replacement, false)) => {
                in_run = false;
                out.push(replacement);
            }
            Some((replacement, true)) => {
                if !in_run {
                    out.push(replacement);
                    in_run = true;
                }
            }
        }
    }
    Cow::Owned(out)
}

/// Sanitizes a tracestate tag key.
pub(crate) fn sanitize_key(s: &str) -> Cow<'_, str> {
    sanitize(s, key_disallowed)
}

/// Sanitizes a tracestate tag value.
pub(crate) fn sanitize_value(s: &str) -> Cow<'_, str> {
    sanitize(s, value_disallowed)
}

/// Sanitizes an origin for the tracestate `o:` entry.
pub(crate) fn sanitize_origin(s: &str) -> Cow<'_, str> {
    sanitize(s, origin_disallowed)
}
