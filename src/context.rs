//! Span context and span link types.
//!
//! A [`SpanContext`] is the identity of an in-flight trace as it crosses a
//! process boundary: trace and span ids, the sampling decision and its
//! provenance, origin, baggage, propagating tags and the reparenting hint.
//! It is built either by the local tracer for a fresh trace or by an
//! extractor for a remote one.
//!
//! Propagating tags and the sampling decision live behind a per-context
//! lock; the baggage flag and the `remote`/`updated` bits are atomics, so a
//! context can be shared by concurrent injectors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::config::TracePropagationStyle;
use crate::propagator::trace_context::TRACESTATE_HEADER;
use crate::trace_id::TraceId;

/// Sampling priorities understood by the backend.
pub mod priority {
    /// The user explicitly rejected the trace.
    pub const USER_REJECT: i32 = -1;
    /// The sampler rejected the trace.
    pub const AUTO_REJECT: i32 = 0;
    /// The sampler kept the trace.
    pub const AUTO_KEEP: i32 = 1;
    /// The user explicitly kept the trace.
    pub const USER_KEEP: i32 = 2;
}

/// Propagating tag carrying the upper 64 bits of a 128-bit trace id.
pub(crate) const KEY_TRACE_ID_128: &str = "_dd.p.tid";

/// Propagating tag carrying the sampling decision maker.
pub(crate) const KEY_DECISION_MAKER: &str = "_dd.p.dm";

/// Provenance of a sampling decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerSource {
    /// The decision arrived from upstream or is otherwise unattributed.
    Unknown,
    /// The default sampler made the decision.
    Default,
    /// The agent-supplied sample rate made the decision.
    AgentRate,
    /// The user made the decision manually.
    Manual,
}

/// A secondary reference from the current trace to a peer trace that was
/// observed during extraction but not adopted as the parent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanLink {
    /// Lower 64 bits of the linked trace id.
    pub trace_id: u64,
    /// Upper 64 bits of the linked trace id.
    pub trace_id_high: u64,
    /// The linked span id.
    pub span_id: u64,
    /// Sampling flags: `1` when the linked trace was kept, else `0`.
    pub flags: u32,
    /// W3C tracestate header value carried by the linked context, if any.
    pub tracestate: String,
    /// Attributes describing why the link was created.
    pub attributes: HashMap<String, String>,
}

impl SpanLink {
    /// Builds the link recorded when an extractor disagrees with the winning
    /// context on the trace id.
    pub(crate) fn terminated_context(ctx: &SpanContext, style: TracePropagationStyle) -> Self {
        let attributes = HashMap::from([
            ("reason".to_owned(), "terminated_context".to_owned()),
            ("context_headers".to_owned(), style.to_string()),
        ]);
        SpanLink {
            trace_id: ctx.trace_id().lower(),
            trace_id_high: ctx.trace_id().upper(),
            span_id: ctx.span_id(),
            flags: u32::from(ctx.sampling_priority().unwrap_or(0) > 0),
            tracestate: ctx.propagating_tag(TRACESTATE_HEADER).unwrap_or_default(),
            attributes,
        }
    }
}

/// State shared by everything that can mutate the trace-level decision:
/// the sampling priority, the propagating tag table and the codec
/// diagnostic slot.
#[derive(Debug, Default)]
struct Propagated {
    priority: Option<(i32, SamplerSource)>,
    tags: Vec<(String, String)>,
    propagation_error: Option<&'static str>,
}

/// The identity of an in-flight trace at a process boundary.
#[derive(Debug, Default)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: u64,
    origin: String,
    reparent_id: String,
    state: Mutex<Propagated>,
    baggage: Mutex<Vec<(String, String)>>,
    has_baggage: AtomicBool,
    baggage_only: bool,
    is_remote: AtomicBool,
    updated: AtomicBool,
    span_links: Vec<SpanLink>,
}

impl SpanContext {
    /// Creates an empty context with no trace identity.
    pub fn new() -> Self {
        SpanContext::default()
    }

    /// The trace id.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Replaces the trace id.
    pub fn set_trace_id(&mut self, trace_id: TraceId) {
        self.trace_id = trace_id;
    }

    pub(crate) fn trace_id_mut(&mut self) -> &mut TraceId {
        &mut self.trace_id
    }

    /// The span id; the parent id when injecting.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Replaces the span id.
    pub fn set_span_id(&mut self, span_id: u64) {
        self.span_id = span_id;
    }

    /// The trace origin, empty when unset.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Replaces the trace origin. Invalidates the cached tracestate when a
    /// remote context is given a different origin.
    pub fn set_origin(&mut self, origin: impl Into<String>) {
        let origin = origin.into();
        if origin != self.origin && self.is_remote() {
            self.updated.store(true, Ordering::Release);
        }
        self.origin = origin;
    }

    /// The reparenting hint: 16 hex digits naming the span another format
    /// claimed as parent, empty when unset.
    pub fn reparent_id(&self) -> &str {
        &self.reparent_id
    }

    /// Replaces the reparenting hint. Invalidates the cached tracestate
    /// when a remote context is given a different hint.
    pub fn set_reparent_id(&mut self, reparent_id: impl Into<String>) {
        let reparent_id = reparent_id.into();
        if reparent_id != self.reparent_id && self.is_remote() {
            self.updated.store(true, Ordering::Release);
        }
        self.reparent_id = reparent_id;
    }

    /// Whether the context was produced by an extractor.
    pub fn is_remote(&self) -> bool {
        self.is_remote.load(Ordering::Acquire)
    }

    /// Marks the context as remote or local.
    pub fn set_remote(&self, remote: bool) {
        self.is_remote.store(remote, Ordering::Release);
    }

    /// Whether the sampling decision or tags changed after extraction.
    pub fn updated(&self) -> bool {
        self.updated.load(Ordering::Acquire)
    }

    /// The sampling priority, if one was decided.
    pub fn sampling_priority(&self) -> Option<i32> {
        self.state.lock().unwrap().priority.map(|(p, _)| p)
    }

    /// The sampling priority together with its provenance.
    pub fn sampling_decision(&self) -> Option<(i32, SamplerSource)> {
        self.state.lock().unwrap().priority
    }

    /// Sets the sampling priority, recording its provenance. Invalidates
    /// the cached tracestate when the priority actually changes.
    pub fn set_sampling_priority(&self, priority: i32, source: SamplerSource) {
        if self.store_priority(priority, source) {
            self.updated.store(true, Ordering::Release);
        }
    }

    /// Extractor-side priority population: does not invalidate anything.
    pub(crate) fn init_sampling_priority(&self, priority: i32, source: SamplerSource) {
        self.store_priority(priority, source);
    }

    fn store_priority(&self, priority: i32, source: SamplerSource) -> bool {
        let mut state = self.state.lock().unwrap();
        let changed = state.priority.map_or(true, |(current, _)| current != priority);
        state.priority = Some((priority, source));
        changed
    }

    /// Sets a trace-level tag that travels across process boundaries.
    /// Invalidates the cached tracestate when the value changes.
    pub fn set_propagating_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        let mut state = self.state.lock().unwrap();
        match state.tags.iter().position(|(k, _)| *k == key) {
            Some(i) if state.tags[i].1 == value => return,
            Some(i) => state.tags[i].1 = value,
            None => state.tags.push((key, value)),
        }
        drop(state);
        self.updated.store(true, Ordering::Release);
    }

    /// Extractor-side tag population: does not invalidate anything.
    pub(crate) fn put_propagating_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        let mut state = self.state.lock().unwrap();
        match state.tags.iter().position(|(k, _)| *k == key) {
            Some(i) => state.tags[i].1 = value,
            None => state.tags.push((key, value)),
        }
    }

    pub(crate) fn unset_propagating_tag(&self, key: &str) {
        self.state.lock().unwrap().tags.retain(|(k, _)| k != key);
    }

    /// Looks up a propagating tag by key.
    pub fn propagating_tag(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub(crate) fn has_propagating_tag(&self, key: &str) -> bool {
        self.state.lock().unwrap().tags.iter().any(|(k, _)| k == key)
    }

    /// The number of propagating tags.
    pub fn propagating_tags_len(&self) -> usize {
        self.state.lock().unwrap().tags.len()
    }

    /// Visits each propagating tag in insertion order until the visitor
    /// returns `false`. The tag table is locked for the duration of the
    /// walk; the visitor must not touch the tags or the sampling decision.
    pub fn for_each_propagating_tag(&self, mut visitor: impl FnMut(&str, &str) -> bool) {
        let state = self.state.lock().unwrap();
        for (k, v) in &state.tags {
            if !visitor(k, v) {
                break;
            }
        }
    }

    pub(crate) fn replace_propagating_tags(&self, tags: Vec<(String, String)>) {
        self.state.lock().unwrap().tags = tags;
    }

    pub(crate) fn set_propagation_error(&self, error: &'static str) {
        self.state.lock().unwrap().propagation_error = Some(error);
    }

    /// The last recoverable codec problem hit while moving tags in or out,
    /// one of `encoding_error`, `inject_max_size`, `extract_max_size` or
    /// `decoding_error`.
    pub fn propagation_error(&self) -> Option<&'static str> {
        self.state.lock().unwrap().propagation_error
    }

    /// Sets a baggage item, preserving insertion order across keys.
    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        let mut baggage = self.baggage.lock().unwrap();
        match baggage.iter().position(|(k, _)| *k == key) {
            Some(i) => baggage[i].1 = value,
            None => baggage.push((key, value)),
        }
        self.has_baggage.store(true, Ordering::Release);
    }

    /// Looks up a baggage item by key.
    pub fn baggage_item(&self, key: &str) -> Option<String> {
        self.baggage
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Visits each baggage item in insertion order until the visitor
    /// returns `false`. The baggage is locked for the duration of the walk.
    pub fn for_each_baggage_item(&self, mut visitor: impl FnMut(&str, &str) -> bool) {
        let baggage = self.baggage.lock().unwrap();
        for (k, v) in baggage.iter() {
            if !visitor(k, v) {
                break;
            }
        }
    }

    /// Whether any baggage item is set, without taking the baggage lock.
    pub fn has_baggage(&self) -> bool {
        self.has_baggage.load(Ordering::Acquire)
    }

    /// The number of baggage items.
    pub fn baggage_len(&self) -> usize {
        self.baggage.lock().unwrap().len()
    }

    /// Whether only the baggage format produced data during extraction, in
    /// which case the context has no trace identity.
    pub fn baggage_only(&self) -> bool {
        self.baggage_only
    }

    pub(crate) fn set_baggage_only(&mut self, baggage_only: bool) {
        self.baggage_only = baggage_only;
    }

    /// Links to peer traces observed but not adopted during extraction.
    pub fn span_links(&self) -> &[SpanLink] {
        &self.span_links
    }

    pub(crate) fn set_span_links(&mut self, links: Vec<SpanLink>) {
        self.span_links = links;
    }
}
