//! Error types for data parsing in airstation-types.

use thiserror::Error;

/// Errors that can occur when parsing sensor identifiers.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The string does not name a known sensor kind.
    #[error("Unknown sensor kind: {0}")]
    UnknownKind(String),
}

/// Result type alias using airstation-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
