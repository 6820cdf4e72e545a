//! Error types for the remote store and the sync session.

use comic_core::{CoreError, LayoutError, LibraryError};
use comic_renderer::RenderError;
use thiserror::Error;

/// Result type for remote store calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type for session commands.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur when talking to the page server.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The server URL provided by configuration is invalid.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed (connection, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// JSON parsing failed unexpectedly.
    #[error("failed to parse server payload: {0}")]
    Json(#[from] serde_json::Error),
    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error text from the body, or the status reason.
        message: String,
    },
    /// The server answered 2xx with an `error` field.
    #[error("server error: {0}")]
    Server(String),
    /// The response did not match the expected structure.
    #[error("unexpected server response: {0}")]
    UnexpectedResponse(String),
    /// The push stream broke or sent malformed data.
    #[error("push stream error: {0}")]
    Stream(String),
}

impl RemoteError {
    /// Returns true if this error is retryable (transient HTTP failures and
    /// 5xx answers).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors returned by [`crate::SessionHandle`] commands.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A remote rebuild is being applied; local edits are refused until it
    /// finishes.
    #[error("remote state is being applied, try again shortly")]
    Busy,
    /// The session task has stopped.
    #[error("session closed")]
    Closed,
    /// A page-collection operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// An image-library operation failed.
    #[error(transparent)]
    Library(#[from] LibraryError),
    /// A template could not be resolved.
    #[error(transparent)]
    Layout(#[from] LayoutError),
    /// The remote store failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Rendering or export failed.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// A save did not reach the server.
    #[error("save failed: {0}")]
    SaveFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_is_retryable() {
        assert!(!RemoteError::InvalidUrl("bad".into()).is_retryable());
        assert!(!RemoteError::Server("nope".into()).is_retryable());
        assert!(!RemoteError::UnexpectedResponse("?".into()).is_retryable());
        assert!(RemoteError::Status {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!RemoteError::Status {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_session_error_wraps_core() {
        let err: SessionError = CoreError::PageNotFound(3).into();
        assert_eq!(err.to_string(), "Page not found: 3");
    }
}
