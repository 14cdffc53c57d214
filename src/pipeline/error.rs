//! Hard-fail errors raised by the processing pipeline.

use thiserror::Error;

use super::filters::FilterKind;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("filter {filter} is not applicable: {reason}")]
    InapplicableFilter { filter: FilterKind, reason: String },
    #[error("unknown {filter} algorithm: {algorithm}")]
    UnknownAlgorithm { filter: FilterKind, algorithm: String },
    #[error("options for {found} passed to {expected}")]
    OptionsMismatch { expected: FilterKind, found: FilterKind },
    #[error("invalid spectrum buffer: {0}")]
    InvalidBuffer(String),
    #[error("invalid range: from={from} to={to}")]
    InvalidRange { from: f64, to: f64 },
    #[error("no filter with id {0}")]
    FilterNotFound(String),
    #[error("computation for spectrum {0} was superseded")]
    Superseded(String),
}
