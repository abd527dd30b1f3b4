//! Error taxonomy

use thiserror::Error;

/// Errors surfaced by the view factor core.
///
/// Configuration and validation errors are fatal and are reported once to the
/// caller of the study; they are never retried. Programming-invariant
/// violations (NaN weights, size mismatches) are debug assertions instead and
/// do not appear here.
#[derive(Debug, Error)]
pub enum ViewFactorError {
    /// A constructor was handed an out-of-range or degenerate parameter.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A read accessor was indexed out of range.
    #[error("index {index} is out of range for {what} of size {size}")]
    IndexError {
        what: &'static str,
        index: usize,
        size: usize,
    },

    /// The study setup is inconsistent (handler coverage, duplicate handlers,
    /// unsupported dimensionality). Caught once at setup, never per ray.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A post-trace correctness check failed (row sums or reciprocity beyond
    /// tolerance before normalization).
    #[error("validation failed: {0}")]
    FatalValidation(String),

    /// A queried boundary identifier is not part of the configured set.
    #[error("{0} not found")]
    NotFound(String),
}

/// Convenience result type for the view factor core.
pub type Result<T> = std::result::Result<T, ViewFactorError>;
