//! Error types for the rowguard data validation library.
//!
//! This module provides the error handling strategy using `thiserror`
//! for automatic error trait implementations. All errors in the library
//! are represented by the `GuardError` enum.

use thiserror::Error;

/// The main error type for the rowguard library.
#[derive(Error, Debug)]
pub enum GuardError {
    /// No registered dialect adapter passed its capability probes, or an
    /// explicitly requested dialect does not exist. Fatal to `Source`
    /// construction.
    #[error("No supported SQL dialect: {0}")]
    DialectUnsupported(String),

    /// A referenced column is missing, or declared key lists do not line
    /// up. Fatal to the individual check only.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A query issued through the caller-supplied runner failed.
    #[error("Query failed: {message}")]
    Query {
        /// Detailed error message
        message: String,
        /// Optional underlying error reported by the runner
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error when parsing or processing data.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error when an operation is not supported.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, GuardError>`.
///
/// This is the standard `Result` type used throughout the library.
pub type Result<T> = std::result::Result<T, GuardError>;

impl GuardError {
    /// Creates a schema error for a column missing from a table.
    pub fn column_not_found(column: &str) -> Self {
        Self::Schema(format!("column '{column}' not found in table"))
    }

    /// Creates a query error with the given message.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a query error wrapping an underlying runner error.
    pub fn query_with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Query {
            message: message.into(),
            source: Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_column_not_found_message() {
        let err = GuardError::column_not_found("user_id");
        assert_eq!(
            err.to_string(),
            "Schema error: column 'user_id' not found in table"
        );
    }

    #[test]
    fn test_query_error_preserves_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "gone");
        let err = GuardError::query_with_source("count query failed", Box::new(source));
        assert_eq!(err.to_string(), "Query failed: count query failed");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_dialect_unsupported_message() {
        let err = GuardError::DialectUnsupported("values admitted are: impala, bigquery".into());
        assert!(err.to_string().starts_with("No supported SQL dialect"));
    }
}
