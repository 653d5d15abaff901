//! Error types for airstation-core.
//!
//! # Error taxonomy
//!
//! | Situation | Representation | Retry? |
//! |-----------|----------------|--------|
//! | Unrecognised sensor id | not an error, maps to `SensorKind::Unknown` | - |
//! | No live value within the read timeout | not an error, `Ok(None)` | - |
//! | [`Error::Storage`] | append/query failed | yes, by the scheduler |
//! | [`Error::SourceUnavailable`] / [`Error::SourceClosed`] | reading source unreachable | yes |
//! | [`Error::Timeout`] | bounded operation overran | yes |
//! | [`Error::InvalidFrame`] | bridge sent garbage | no |
//! | [`Error::InvalidConfig`] / [`Error::Preferences`] | bad settings | no |
//! | [`Error::Cancelled`] | shutdown in progress | no |
//!
//! Notifier failures never appear here; notifiers log and swallow them.

use std::time::Duration;

use thiserror::Error;

/// Boxed error used to carry backend-specific storage failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the monitoring core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The history store failed to append or query.
    #[error("Storage error: {0}")]
    Storage(#[source] BoxError),

    /// The reading source could not be reached or refused the subscription.
    #[error("Reading source unavailable: {0}")]
    SourceUnavailable(String),

    /// The reading source subscription ended.
    #[error("Reading source closed")]
    SourceClosed,

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// A frame from the sensor bridge could not be decoded.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Preferences could not be loaded or saved.
    #[error("Preferences error: {0}")]
    Preferences(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a backend storage error.
    pub fn storage(err: impl Into<BoxError>) -> Self {
        Self::Storage(err.into())
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the failed operation may succeed if simply run again later.
    ///
    /// Storage and source faults are transient from the evaluator's point of
    /// view; bad input and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::SourceUnavailable(_)
                | Error::SourceClosed
                | Error::Timeout { .. }
                | Error::Io(_)
        )
    }
}

/// Result type alias using airstation-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SourceClosed;
        assert_eq!(err.to_string(), "Reading source closed");

        let err = Error::timeout("live read", Duration::from_secs(10));
        assert!(err.to_string().contains("live read"));
        assert!(err.to_string().contains("10s"));

        let err = Error::storage("disk full");
        assert_eq!(err.to_string(), "Storage error: disk full");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::storage("locked").is_retryable());
        assert!(Error::SourceClosed.is_retryable());
        assert!(Error::SourceUnavailable("no bridge".into()).is_retryable());
        assert!(!Error::InvalidFrame("{".into()).is_retryable());
        assert!(!Error::invalid_config("bad").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_retryable());
    }
}
