//! Error types for airstation-store.

use std::path::PathBuf;

/// Result type for airstation-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in airstation-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored timestamp is outside the representable range.
    #[error("Invalid timestamp: {0} ms")]
    InvalidTimestamp(i64),

    /// The database was written by a newer version of this crate.
    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    /// A stored row names a sensor kind this version does not know.
    #[error("Unknown sensor kind in database: {0}")]
    UnknownKind(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for airstation_core::Error {
    fn from(err: Error) -> Self {
        airstation_core::Error::storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_to_retryable_core_error() {
        let err: airstation_core::Error = Error::UnknownKind("radon".into()).into();
        assert!(matches!(err, airstation_core::Error::Storage(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("radon"));
    }
}
