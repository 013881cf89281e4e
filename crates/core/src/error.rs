//! Error types for backend capabilities

use thiserror::Error;

/// Result type alias for backend calls
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors surfaced by external capabilities (synthesis, transcription, audio sink)
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Connection("reset".into()).is_transient());
        assert!(BackendError::Timeout("5s".into()).is_transient());
        assert!(!BackendError::Unavailable("down".into()).is_transient());
    }
}
