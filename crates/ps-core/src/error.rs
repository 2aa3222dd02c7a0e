//! Error types for pathsynth.
//!
//! Validation and model-specification errors abort before any sampling cost
//! is spent; sampling failures abort the run. Convergence and per-draw metric
//! issues are *not* errors — they travel as warning flags on results so that
//! every consumer of the output can see them.

use thiserror::Error;

/// pathsynth error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or out-of-domain configuration. Identifies the offending
    /// field and the violated constraint.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal contradiction in prior/likelihood construction (e.g. a
    /// non-positive scale). Unreachable if validation passed.
    #[error("Model specification error: {0}")]
    ModelSpecification(String),

    /// Sampling failed: every attempted starting point had a non-finite
    /// log-density, a chain produced no valid draw, or the wall-clock
    /// deadline expired before all chains finished.
    #[error("Sampling failure: {0}")]
    Sampling(String),

    /// Numerical computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
