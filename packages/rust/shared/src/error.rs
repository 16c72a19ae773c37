//! Error types for dealscout.
//!
//! Library crates use [`DealscoutError`] via `thiserror`. Source failures and
//! write conflicts are ordinary variants here: the run orchestrator isolates
//! them per unit of work instead of aborting a whole discovery run.

/// Top-level error type for all dealscout operations.
#[derive(Debug, thiserror::Error)]
pub enum DealscoutError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Data validation error (malformed candidate, illegal state transition).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A discovery source failed or timed out.
    #[error("source '{source_name}' failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    /// Write conflict that survived the bounded retry loop.
    #[error("write conflict: {message}")]
    Conflict { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DealscoutError>;

impl DealscoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a source failure tagged with the originating source name.
    pub fn source(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a write-conflict error from any displayable message.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DealscoutError::config("missing database path");
        assert_eq!(err.to_string(), "config error: missing database path");

        let err = DealscoutError::source("b-corp", "HTTP 503");
        assert!(err.to_string().contains("b-corp"));
        assert!(err.to_string().contains("HTTP 503"));
    }
}
