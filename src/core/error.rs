// This module defines error types for irscope using the thiserror crate for idiomatic
// Rust error handling. ScopeError covers the fatal conditions of a compilation-unit
// load: an unknown phase type tag (which aborts the whole load; per the error taxonomy
// recoverable gaps are only logged and never surface here), a structurally malformed
// phase payload, a JSON syntax failure from serde_json, and a missing required
// top-level field. ScopeResult<T> is the convenience alias used throughout the crate.

//! Error types for irscope.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for loading a compilation unit.
#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Unknown phase type: {kind}")]
    UnknownPhaseType { kind: String },

    #[error("Malformed {phase} phase payload: {reason}")]
    MalformedPhase {
        phase: &'static str,
        reason: String,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Result type alias for load operations.
pub type ScopeResult<T> = Result<T, ScopeError>;
