//! Error types shared by every stage of the SPM pipeline.
//!
//! Numeric degeneracies (zero pooled variance, rank-deficient designs) are
//! not errors: they are absorbed locally by pseudo-inverses or by zeroing
//! the affected voxel.

use thiserror::Error;

/// Errors raised by design construction, estimation and inference
#[derive(Debug, Error)]
pub enum SpmError {
    /// Malformed input shape or value (contrast length, row count, scope, mode string)
    #[error("validation error: {0}")]
    Validation(String),

    /// Observation files not assigned or not found at estimation entry
    #[error("missing data: {0}")]
    MissingData(String),

    /// Newton inversion exceeded its iteration cap
    #[error("no convergence solving for p = {target} after {iterations} iterations (last step {last_step:e})")]
    Convergence {
        target: f64,
        iterations: usize,
        last_step: f64,
    },

    /// A cancellation token was raised while a long loop was running
    #[error("operation cancelled")]
    Cancelled,

    #[error("design serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, SpmError>;

/// Shorthand for building a validation error from anything printable
pub(crate) fn invalid(msg: impl Into<String>) -> SpmError {
    SpmError::Validation(msg.into())
}
