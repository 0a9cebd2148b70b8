use std::path::PathBuf;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Engine-wide error type.
///
/// The variants map to the recovery policy the engine applies: `Config` is
/// fatal before any work starts, `Locked` is deferred into the pending-ops
/// journal, `ManifestShape` skips the offending entry, and `Cancelled`
/// unwinds to the host without touching the applied-version marker.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration incomplete: {0}")]
    Config(String),

    #[error("HTTP {status} for {url}: {snippet}")]
    Network {
        status: u16,
        url: String,
        snippet: String,
    },

    #[error("integrity mismatch for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("resource is held open by another process: {}", .0.display())]
    Locked(PathBuf),

    #[error("bad manifest entry: {0}")]
    ManifestShape(String),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

impl AppError {
    /// Process exit code the host binary reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 2,
            AppError::Cancelled => 3,
            _ => 1,
        }
    }

    /// True when the error is worth another download attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Network { .. } | AppError::Http(_) | AppError::Integrity { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(AppError::Config("no url".into()).exit_code(), 2);
        assert_eq!(AppError::Cancelled.exit_code(), 3);
        assert_eq!(AppError::Custom("boom".into()).exit_code(), 1);
        assert_eq!(
            AppError::Locked(PathBuf::from("mods/a.jar")).exit_code(),
            1
        );
    }

    #[test]
    fn integrity_errors_are_retryable() {
        let err = AppError::Integrity {
            path: PathBuf::from("staging/a.tmp"),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.is_retryable());
        assert!(!AppError::Cancelled.is_retryable());
    }
}
