// src/error.rs
// Standardized error types for Quarry

use thiserror::Error;

/// Main error type for the Quarry library
#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("build already in progress")]
    BuildInProgress,

    #[error("no build to {0} in the current state")]
    InvalidBuildState(&'static str),

    #[error("indexing is not supported on this platform")]
    UnsupportedPlatform,

    #[error("build worker unavailable: {0}")]
    WorkerGone(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using QuarryError
pub type Result<T> = std::result::Result<T, QuarryError>;

impl From<String> for QuarryError {
    fn from(s: String) -> Self {
        QuarryError::Other(s)
    }
}

impl From<tokio::task::JoinError> for QuarryError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            QuarryError::Cancelled
        } else {
            QuarryError::Other(err.to_string())
        }
    }
}

impl From<QuarryError> for String {
    fn from(err: QuarryError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_error() {
        let err = QuarryError::InvalidInput("bad query".to_string());
        assert!(err.to_string().contains("invalid input"));
        assert!(err.to_string().contains("bad query"));
    }

    #[test]
    fn test_build_in_progress_error() {
        let err = QuarryError::BuildInProgress;
        assert!(err.to_string().contains("already in progress"));
    }

    #[test]
    fn test_invalid_build_state_error() {
        let err = QuarryError::InvalidBuildState("pause");
        assert!(err.to_string().contains("pause"));
    }

    #[test]
    fn test_embedding_error() {
        let err = QuarryError::Embedding("dimension mismatch".to_string());
        assert!(err.to_string().contains("embedding error"));
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_unsupported_platform_error() {
        let err = QuarryError::UnsupportedPlatform;
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_from_string() {
        let err: QuarryError = "some error".to_string().into();
        assert!(matches!(err, QuarryError::Other(_)));
        assert!(err.to_string().contains("some error"));
    }

    #[test]
    fn test_into_string() {
        let err = QuarryError::Cancelled;
        let s: String = err.into();
        assert!(s.contains("cancelled"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: QuarryError = io_err.into();
        assert!(matches!(err, QuarryError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<i32>("not json").unwrap_err();
        let err: QuarryError = json_err.into();
        assert!(matches!(err, QuarryError::Json(_)));
    }
}
