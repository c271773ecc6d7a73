use thiserror::Error;

/// Errors returned while injecting or extracting span contexts.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The carrier does not have the capability the operation needs.
    #[error("invalid carrier")]
    InvalidCarrier,

    /// The span context is missing a trace id or a span id.
    #[error("invalid span context")]
    InvalidSpanContext,

    /// No propagation format produced a span context.
    #[error("span context not found")]
    NotFound,

    /// A header was present but syntactically invalid.
    #[error("span context corrupted")]
    Corrupted,
}
