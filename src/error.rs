//! Error types for the dispatch client.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the dispatch error type.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Main error type for the dispatch client.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Validation error (e.g., missing required file, file input disabled)
    #[error("Validation error: {0}")]
    Validation(String),

    /// No authenticated session is available for the operation
    #[error("Not authenticated")]
    Unauthenticated,

    /// Operation requires an in-flight request but none exists
    #[error("No request in flight")]
    NoRequestInFlight,

    /// Failed to read a file selected for staging
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport reported that the request timed out
    #[error("Request timed out")]
    Timeout,

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while writing an artifact
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DispatchError {
    /// Whether this error is the distinguished timeout kind.
    ///
    /// Both an explicit [`DispatchError::Timeout`] and a reqwest error that reports
    /// a timeout classify as timeouts, so the caller can render them identically.
    pub fn is_timeout(&self) -> bool {
        match self {
            DispatchError::Timeout => true,
            DispatchError::HttpClient(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(DispatchError::Timeout.is_timeout());
        assert!(!DispatchError::Validation("missing file".to_string()).is_timeout());
        assert!(!DispatchError::Other(anyhow::anyhow!("connection reset")).is_timeout());
    }

    #[test]
    fn test_file_read_message_names_path() {
        let err = DispatchError::FileRead {
            path: PathBuf::from("/tmp/po.edi"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/tmp/po.edi"));
    }
}
