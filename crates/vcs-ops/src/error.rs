use std::sync::Arc;

use thiserror::Error;

use crate::status::{Status, StatusCode, StatusRef};

/// Errors that can occur while running VCS operations
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Operation canceled")]
    Canceled,

    #[error("Unable to connect to {location}: {reason}")]
    Connection { location: String, reason: String },

    #[error("Protocol failure: {0}")]
    Protocol(String),

    #[error("{0}")]
    Reportable(StatusRef),

    #[error("Server error: {0}")]
    Server(StatusRef),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal consistency error: {0}")]
    Invariant(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, VcsError>;

impl VcsError {
    /// Create a Connection error for a repository location
    pub fn connection(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Create an Invariant error; these terminate the whole operation
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether a pass may record this error and let sibling work continue.
    ///
    /// Cancellation and broken invariants abort the whole operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Canceled | Self::Invariant(_))
    }

    /// Convert the error into a status the result aggregator can record
    pub fn to_status(&self) -> StatusRef {
        match self {
            Self::Reportable(status) | Self::Server(status) => Arc::clone(status),
            Self::Connection { .. } | Self::Validation(_) | Self::ResourceNotFound(_) => {
                Status::error(StatusCode::UNABLE, self.to_string())
            }
            Self::Canceled => Status::cancel(),
            Self::Protocol(_) | Self::Config(_) | Self::Io(_) | Self::Invariant(_) => {
                Status::error(StatusCode::INTERNAL_ERROR, self.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Severity;

    #[test]
    fn test_connection_maps_to_unable() {
        let err = VcsError::connection(":pserver:host:/cvs", "refused");
        let status = err.to_status();
        assert_eq!(status.code(), StatusCode::UNABLE);
        assert_eq!(status.severity(), Severity::Error);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_server_error_keeps_status() {
        let status = Status::server_error("commit failed");
        let err = VcsError::Server(Arc::clone(&status));
        assert!(Arc::ptr_eq(&err.to_status(), &status));
    }

    #[test]
    fn test_cancel_and_invariant_are_fatal() {
        assert!(!VcsError::Canceled.is_recoverable());
        assert!(!VcsError::invariant("bad").is_recoverable());
        assert!(VcsError::Protocol("eof".into()).is_recoverable());
    }
}
