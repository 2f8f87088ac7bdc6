//! Rich diagnostic error types for the sia store.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so callers know exactly what went wrong
//! and how to fix it.
//!
//! Absent records are never errors: read paths return `Ok(None)` or an empty
//! vec. Analytic failures never surface at all — the engine facade catches
//! them, logs, and degrades to empty results.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the sia store.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum SiaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// A malformed entity was rejected before any durable write was attempted.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("{entity} is missing an id")]
    #[diagnostic(
        code(sia::validation::missing_id),
        help("Every record needs a non-empty string id. Generate one before storing.")
    )]
    MissingId { entity: &'static str },

    #[error("node {id} is missing a label")]
    #[diagnostic(
        code(sia::validation::missing_label),
        help("Knowledge nodes require a human-readable label.")
    )]
    MissingLabel { id: String },

    #[error("{field} = {value} is outside [0.0, 1.0]")]
    #[diagnostic(
        code(sia::validation::out_of_range),
        help(
            "Scores (success_rate, confidence, strength, importance) are unit \
             intervals. Clamp or recompute the value before storing."
        )
    )]
    OutOfRange { field: &'static str, value: f64 },

    #[error("relationship endpoint {node_id} does not exist")]
    #[diagnostic(
        code(sia::validation::missing_endpoint),
        help(
            "Both the source and target node must be stored before a \
             relationship can reference them. Add the missing node first."
        )
    )]
    MissingEndpoint { node_id: String },

    #[error("unknown pattern: {id}")]
    #[diagnostic(
        code(sia::validation::unknown_pattern),
        help(
            "Usage can only be recorded against a stored pattern. \
             Store the pattern first, or check the id for typos."
        )
    )]
    UnknownPattern { id: String },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// A durable-backend failure. The requested state change did not happen;
/// callers may retry or surface the error — this crate performs no retries.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(sia::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(sia::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             This may indicate corruption — try running with a fresh data directory. \
             If the problem persists, file a bug report."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(sia::store::serde),
        help(
            "Failed to serialize or deserialize a record. This usually means the \
             stored data format has changed between versions. Try re-seeding the store."
        )
    )]
    Serialization { message: String },
}

/// Convenience alias for functions returning sia results.
pub type SiaResult<T> = std::result::Result<T, SiaError>;
