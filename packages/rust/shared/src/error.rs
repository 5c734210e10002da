//! Error types for PostForge.
//!
//! Library crates use [`PostForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all PostForge operations.
#[derive(Debug, thiserror::Error)]
pub enum PostForgeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The generation service failed, returned malformed output, or timed out.
    #[error("generation service error: {0}")]
    Generation(String),

    /// The generation service answered but produced nothing usable.
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// Generated content is degenerate (near-empty).
    #[error("content too short: {words} words (minimum {minimum})")]
    ContentTooShort { words: usize, minimum: usize },

    /// No keyword is waiting to be processed.
    #[error("no pending keyword available")]
    NoPendingKeyword,

    /// Another generation run holds the single-flight guard.
    #[error("already running: job {job_id}")]
    AlreadyRunning { job_id: String },

    /// The quality gate rejected the draft.
    #[error("quality gate rejected draft: {}", errors.join("; "))]
    QualityGate { errors: Vec<String> },

    /// A post with this slug already exists (lost a resolve/insert race).
    #[error("slug collision: {slug}")]
    SlugCollision { slug: String },

    /// A job run state change that the state machine does not allow.
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input, invalid state, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PostForgeError>;

impl PostForgeError {
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

    /// Create a not-found error for the named entity.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Generation(_)
                | Self::EmptyResult(_)
                | Self::ContentTooShort { .. }
                | Self::SlugCollision { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PostForgeError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = PostForgeError::QualityGate {
            errors: vec!["too short".into(), "no headings".into()],
        };
        assert_eq!(
            err.to_string(),
            "quality gate rejected draft: too short; no headings"
        );

        let err = PostForgeError::InvalidTransition {
            job_id: "j1".into(),
            from: "completed".into(),
            to: "running".into(),
        };
        assert!(err.to_string().contains("completed -> running"));
    }

    #[test]
    fn retryable_classification() {
        assert!(PostForgeError::Generation("timeout".into()).is_retryable());
        assert!(
            PostForgeError::SlugCollision {
                slug: "a".into()
            }
            .is_retryable()
        );
        assert!(!PostForgeError::NoPendingKeyword.is_retryable());
        assert!(!PostForgeError::validation("bad").is_retryable());
    }
}
