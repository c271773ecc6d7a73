//! Propagator selection: configuration, environment resolution and the
//! chain factory.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use crate::propagator::{
    B3Propagator, B3SingleHeaderPropagator, BaggagePropagator, ChainedPropagator,
    DatadogPropagator, Propagator, TraceContextPropagator,
};

/// Selects the propagation styles used for injection.
pub const ENV_PROPAGATION_STYLE_INJECT: &str = "DD_TRACE_PROPAGATION_STYLE_INJECT";

/// Selects the propagation styles used for extraction.
pub const ENV_PROPAGATION_STYLE_EXTRACT: &str = "DD_TRACE_PROPAGATION_STYLE_EXTRACT";

/// Selects the propagation styles for both directions.
pub const ENV_PROPAGATION_STYLE: &str = "DD_TRACE_PROPAGATION_STYLE";

/// OpenTelemetry's propagator selection, consulted when no Datadog style
/// variable is set. `b3` means the single-header format there, `b3multi`
/// the multi-header one.
pub const ENV_OTEL_PROPAGATORS: &str = "OTEL_PROPAGATORS";

/// Makes the chain return the first extractor's result as-is.
pub const ENV_PROPAGATION_EXTRACT_FIRST: &str = "DD_TRACE_PROPAGATION_EXTRACT_FIRST";

/// Overrides the outgoing trace-tag header length budget.
pub const ENV_TAGS_MAX_LENGTH: &str = "DD_TRACE_X_DATADOG_TAGS_MAX_LENGTH";

/// Prefix used to propagate baggage items as individual headers.
pub const DEFAULT_BAGGAGE_HEADER_PREFIX: &str = "ot-baggage-";

/// Header carrying the lower half of the trace id, as decimal.
pub const DEFAULT_TRACE_ID_HEADER: &str = "x-datadog-trace-id";

/// Header carrying the parent span id, as decimal.
pub const DEFAULT_PARENT_ID_HEADER: &str = "x-datadog-parent-id";

/// Header carrying the sampling priority.
pub const DEFAULT_PRIORITY_HEADER: &str = "x-datadog-sampling-priority";

/// Header carrying the trace origin.
pub(crate) const ORIGIN_HEADER: &str = "x-datadog-origin";

/// Header carrying the propagated trace tags.
pub(crate) const TRACE_TAGS_HEADER: &str = "x-datadog-tags";

const DEFAULT_MAX_TAGS_HEADER_LEN: usize = 128;
const MAX_TAGS_HEADER_LEN_LIMIT: usize = 512;

/// The wire formats a propagator can speak.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracePropagationStyle {
    /// The Datadog multi-header format.
    Datadog,
    /// The W3C `traceparent`/`tracestate` pair.
    TraceContext,
    /// Zipkin B3 with one header per field.
    B3Multi,
    /// Zipkin B3 with the single `b3` header.
    B3SingleHeader,
    /// The standalone W3C `baggage` header.
    Baggage,
    /// No propagation.
    None,
}

impl fmt::Display for TracePropagationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TracePropagationStyle::Datadog => "datadog",
            TracePropagationStyle::TraceContext => "tracecontext",
            TracePropagationStyle::B3Multi => "b3multi",
            TracePropagationStyle::B3SingleHeader => "b3",
            TracePropagationStyle::Baggage => "baggage",
            TracePropagationStyle::None => "none",
        };
        f.write_str(name)
    }
}

impl FromStr for TracePropagationStyle {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().trim() {
            "datadog" => Ok(TracePropagationStyle::Datadog),
            "tracecontext" => Ok(TracePropagationStyle::TraceContext),
            // historical spelling: a bare "b3" selects the multi-header format
            "b3" | "b3multi" => Ok(TracePropagationStyle::B3Multi),
            "b3 single header" => Ok(TracePropagationStyle::B3SingleHeader),
            "baggage" => Ok(TracePropagationStyle::Baggage),
            "none" => Ok(TracePropagationStyle::None),
            _ => Err(()),
        }
    }
}

/// Configuration for building a propagator chain.
///
/// Header names are configurable for the Datadog format only; every other
/// format has fixed header names.
#[derive(Clone, Debug)]
pub struct PropagatorConfig {
    /// Prefix for per-item baggage headers. Defaults to `ot-baggage-`.
    pub baggage_prefix: String,
    /// Header carrying the trace id. Defaults to `x-datadog-trace-id`.
    pub trace_header: String,
    /// Header carrying the parent id. Defaults to `x-datadog-parent-id`.
    pub parent_header: String,
    /// Header carrying the sampling priority. Defaults to
    /// `x-datadog-sampling-priority`.
    pub priority_header: String,
    /// Length budget for the outgoing trace-tag header; `0` disables tag
    /// propagation. Defaults to 128, capped at 512.
    pub max_tags_header_len: usize,
    /// Adds B3 multi-header propagation ahead of the configured styles.
    pub b3: bool,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        PropagatorConfig {
            baggage_prefix: DEFAULT_BAGGAGE_HEADER_PREFIX.to_owned(),
            trace_header: DEFAULT_TRACE_ID_HEADER.to_owned(),
            parent_header: DEFAULT_PARENT_ID_HEADER.to_owned(),
            priority_header: DEFAULT_PRIORITY_HEADER.to_owned(),
            max_tags_header_len: DEFAULT_MAX_TAGS_HEADER_LEN,
            b3: false,
        }
    }
}

/// Builds a propagator chain from the configuration and the environment.
///
/// The styles for each direction are resolved in order of precedence:
/// the direction-specific variable, then [`ENV_PROPAGATION_STYLE`], then
/// [`ENV_OTEL_PROPAGATORS`], then the default `datadog,tracecontext,baggage`
/// (plus B3 when the configuration asks for it).
pub fn new_propagator(cfg: Option<PropagatorConfig>) -> ChainedPropagator {
    let mut cfg = cfg.unwrap_or_default();
    normalize(&mut cfg);
    let cfg = Arc::new(cfg);

    let extract_first = bool_env(ENV_PROPAGATION_EXTRACT_FIRST, false);
    let inject_styles = env_nonempty(ENV_PROPAGATION_STYLE_INJECT).or_else(style_fallback);
    let extract_styles = env_nonempty(ENV_PROPAGATION_STYLE_EXTRACT).or_else(style_fallback);

    let (injectors, injector_names) = build_propagators(&cfg, inject_styles.as_deref());
    let (extractors, extractor_names) = build_propagators(&cfg, extract_styles.as_deref());
    ChainedPropagator::new(
        injectors,
        extractors,
        injector_names,
        extractor_names,
        extract_first,
    )
}

fn normalize(cfg: &mut PropagatorConfig) {
    if cfg.baggage_prefix.is_empty() {
        cfg.baggage_prefix = DEFAULT_BAGGAGE_HEADER_PREFIX.to_owned();
    }
    if cfg.trace_header.is_empty() {
        cfg.trace_header = DEFAULT_TRACE_ID_HEADER.to_owned();
    }
    if cfg.parent_header.is_empty() {
        cfg.parent_header = DEFAULT_PARENT_ID_HEADER.to_owned();
    }
    if cfg.priority_header.is_empty() {
        cfg.priority_header = DEFAULT_PRIORITY_HEADER.to_owned();
    }
    if let Some(len) = env_nonempty(ENV_TAGS_MAX_LENGTH) {
        match len.parse::<usize>() {
            Ok(len) => cfg.max_tags_header_len = len,
            Err(_) => warn!(
                value = len.as_str(),
                "non-integer value for {ENV_TAGS_MAX_LENGTH}, using {}",
                cfg.max_tags_header_len
            ),
        }
    }
    if cfg.max_tags_header_len > MAX_TAGS_HEADER_LEN_LIMIT {
        warn!(
            configured = cfg.max_tags_header_len,
            limit = MAX_TAGS_HEADER_LEN_LIMIT,
            "trace-tag header length budget capped"
        );
        cfg.max_tags_header_len = MAX_TAGS_HEADER_LEN_LIMIT;
    }
}

/// Resolves the direction-independent style variables.
fn style_fallback() -> Option<String> {
    env_nonempty(ENV_PROPAGATION_STYLE)
        .or_else(|| env_nonempty(ENV_OTEL_PROPAGATORS).map(map_otel_styles))
}

/// Rewrites OpenTelemetry style names into their Datadog equivalents:
/// `b3` selects the single-header format and `b3multi` the multi-header one.
fn map_otel_styles(styles: String) -> String {
    styles
        .split(',')
        .map(|style| match style.trim().to_lowercase().as_str() {
            "b3" => "b3 single header".to_owned(),
            "b3multi" => "b3".to_owned(),
            other => other.to_owned(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn default_propagators(cfg: &Arc<PropagatorConfig>) -> (Vec<Arc<dyn Propagator>>, String) {
    let mut list: Vec<Arc<dyn Propagator>> = vec![
        Arc::new(DatadogPropagator::new(cfg.clone())),
        Arc::new(TraceContextPropagator::new()),
        Arc::new(BaggagePropagator::new()),
    ];
    let mut names = "datadog,tracecontext,baggage".to_owned();
    if cfg.b3 {
        list.push(Arc::new(B3Propagator::new()));
        names.push_str(",b3");
    }
    (list, names)
}

/// Turns a comma separated style list into propagators. Unknown names warn
/// and are skipped; `none` mixed with other names warns and is ignored; an
/// empty or all-invalid list falls back to the default.
fn build_propagators(
    cfg: &Arc<PropagatorConfig>,
    styles: Option<&str>,
) -> (Vec<Arc<dyn Propagator>>, String) {
    let Some(styles) = styles else {
        return default_propagators(cfg);
    };
    let styles = styles.to_lowercase();
    if styles.trim() == "none" {
        return (Vec::new(), String::new());
    }
    let mut list: Vec<Arc<dyn Propagator>> = Vec::new();
    let mut names: Vec<&str> = Vec::new();
    if cfg.b3 {
        list.push(Arc::new(B3Propagator::new()));
        names.push("b3");
    }
    for style in styles.split(',') {
        match style.trim() {
            "datadog" => {
                list.push(Arc::new(DatadogPropagator::new(cfg.clone())));
                names.push("datadog");
            }
            "tracecontext" => {
                list.push(Arc::new(TraceContextPropagator::new()));
                names.push("tracecontext");
            }
            "baggage" => {
                list.push(Arc::new(BaggagePropagator::new()));
                names.push("baggage");
            }
            name @ ("b3" | "b3multi") => {
                if !cfg.b3 {
                    list.push(Arc::new(B3Propagator::new()));
                    names.push(name);
                }
            }
            "b3 single header" => {
                list.push(Arc::new(B3SingleHeaderPropagator::new()));
                names.push("b3 single header");
            }
            "none" => warn!(
                "propagation style \"none\" has no effect when combined with other styles; \
                 set the list to exactly \"none\" to disable propagation"
            ),
            other => warn!(style = other, "unrecognized propagation style"),
        }
    }
    if list.is_empty() {
        return default_propagators(cfg);
    }
    (list, names.join(","))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn bool_env(key: &str, default: bool) -> bool {
    match env_nonempty(key) {
        Some(v) => match v.to_lowercase().as_str() {
            "1" | "true" => true,
            "0" | "false" => false,
            _ => {
                warn!(key, value = v.as_str(), "non-boolean environment value ignored");
                default
            }
        },
        None => default,
    }
}
