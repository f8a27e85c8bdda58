//! Unified error types for the Relay core.
//!
//! Framework-level errors (router merging, plugin registration, engine
//! startup) are defined in `relay-framework`.

use thiserror::Error;

/// The boxed error type handler callbacks may fail with.
///
/// Anything implementing `std::error::Error + Send + Sync` converts into it
/// via `?`, so callbacks can return `Result<_, E>` for their own error types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Handler Errors
// =============================================================================

/// A failure raised by a handler while processing an update.
///
/// The engine recovers from these locally: the failure is logged and the
/// handler is treated as if it returned [`Flow::Continue`](crate::Flow::Continue).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The callback returned an error.
    #[error("handler failed: {0}")]
    Failed(#[source] BoxError),

    /// The callback panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Builds a [`HandlerError::Panicked`] from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors reported by the external transport behind an [`Environment`].
///
/// [`Environment`]: crate::Environment
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport is not connected to the backend.
    #[error("transport is not connected")]
    NotConnected,

    /// A raw API request failed.
    #[error("request '{method}' failed: {reason}")]
    Request {
        /// The API method that was called.
        method: String,
        /// Reason for failure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    Send(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Creates a [`TransportError::Request`].
    pub fn request(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Request {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type produced by one handler invocation.
pub type HandlerResult = Result<crate::Flow, HandlerError>;
