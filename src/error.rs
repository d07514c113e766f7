//! Crate-wide error taxonomy.
//!
//! Every error carries enough structure for the HTTP layer to map it to a
//! status code and a machine-readable `error` code without string matching.
//! Degradation (embedder or LLM failure) is deliberately NOT represented
//! here — those paths fall back silently and only log.

use thiserror::Error;

/// Main error type for engram operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed input. Maps to 400 with the given code.
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },

    /// Resource absent (or soft-deleted where that matters). Maps to 404.
    #[error("{message}")]
    NotFound {
        code: &'static str,
        message: String,
    },

    /// Insert with an explicit id that already exists. Maps to 400.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Database connection, constraint, or transaction failure. Maps to 500.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// JSON (de)serialization failure inside storage rows. Maps to 500.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking task or background join failed. Maps to 500.
    #[error("task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    /// The machine-readable error code used in HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::NotFound { code, .. } => code,
            Self::AlreadyExists(_) => "already_exists",
            Self::Storage(_) | Self::Json(_) | Self::Task(_) => "server_error",
        }
    }
}

/// Result type alias for engram operations.
pub type Result<T> = std::result::Result<T, Error>;
