//! Error types for sandbox-guard operations.
//!
//! Watchers handle every error locally; these values only surface through
//! configuration loading, model loading, and offline tooling.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Home directory not found")]
    HomeDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Cannot attach to process {pid}: not found")]
    AttachFailed { pid: u32 },

    #[error("Sampling process {pid} failed: {reason}")]
    SampleFailed { pid: u32, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Classifier Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Model artifact invalid: {0}")]
    ModelInvalid(String),

    #[error("Cannot classify an empty sample window")]
    EmptyWindow,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using GuardError.
pub type Result<T> = std::result::Result<T, GuardError>;

impl GuardError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        GuardError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        GuardError::Json {
            context: context.into(),
            source,
        }
    }
}
