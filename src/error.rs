//! Error type for insert runs.
//!
//! Local validation errors (`InvalidIdentifier`, `UnsupportedType`,
//! `NoColumnsConfigured`) are raised before any connection is opened. Row-level
//! errors carry the zero-based index of the input row that produced them.

use std::fmt;

use crate::backend::BackendError;
use crate::config::ConfigError;

/// Error type for building and executing an insert run
#[derive(Debug)]
pub enum InsertError {
    InvalidIdentifier(String),
    UnsupportedType(String),
    NoColumnsConfigured,
    Config(ConfigError),
    Connection(BackendError),
    ValueResolution {
        row: usize,
        column: String,
        reason: String,
    },
    TypeMismatch {
        row: usize,
        column: String,
        reason: String,
    },
    Execution {
        row: usize,
        source: BackendError,
    },
    /// The transaction could not be committed after all rows executed
    Commit(BackendError),
    /// Only ever logged; a failed rollback never replaces the error that caused it.
    Rollback(BackendError),
}

impl InsertError {
    /// Index of the input row this error belongs to, if any
    pub fn row(&self) -> Option<usize> {
        match self {
            InsertError::ValueResolution { row, .. }
            | InsertError::TypeMismatch { row, .. }
            | InsertError::Execution { row, .. } => Some(*row),
            _ => None,
        }
    }

    /// True for errors raised before a connection is ever requested
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            InsertError::InvalidIdentifier(_)
                | InsertError::UnsupportedType(_)
                | InsertError::NoColumnsConfigured
                | InsertError::Config(_)
        )
    }
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::InvalidIdentifier(input) => write!(
                f,
                "Invalid identifier: {}. Only letters, numbers, and underscores are allowed, and it must not start with a number.",
                input
            ),
            InsertError::UnsupportedType(name) => write!(f, "Unsupported SQL type: {}", name),
            InsertError::NoColumnsConfigured => {
                write!(f, "Please configure at least one column mapping.")
            }
            InsertError::Config(e) => write!(f, "Configuration error: {}", e),
            InsertError::Connection(e) => write!(f, "Connection error: {}", e),
            InsertError::ValueResolution { row, column, reason } => write!(
                f,
                "Could not resolve value for column '{}' on row {}: {}",
                column, row, reason
            ),
            InsertError::TypeMismatch { row, column, reason } => write!(
                f,
                "Value for column '{}' on row {} does not match its type: {}",
                column, row, reason
            ),
            InsertError::Execution { row, source } => {
                write!(f, "Insert failed on row {}: {}", row, source)
            }
            InsertError::Commit(e) => write!(f, "Commit failed: {}", e),
            InsertError::Rollback(e) => write!(f, "Rollback failed: {}", e),
        }
    }
}

impl std::error::Error for InsertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InsertError::Config(e) => Some(e),
            InsertError::Connection(e)
            | InsertError::Execution { source: e, .. }
            | InsertError::Commit(e)
            | InsertError::Rollback(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for InsertError {
    fn from(err: ConfigError) -> Self {
        InsertError::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_index_only_on_row_errors() {
        let err = InsertError::Execution {
            row: 2,
            source: BackendError::Query("duplicate key".to_string()),
        };
        assert_eq!(err.row(), Some(2));
        assert_eq!(InsertError::NoColumnsConfigured.row(), None);
    }

    #[test]
    fn test_local_classification() {
        assert!(InsertError::InvalidIdentifier("1abc".to_string()).is_local());
        assert!(InsertError::UnsupportedType("bogus".to_string()).is_local());
        assert!(!InsertError::Connection(BackendError::Connect("refused".to_string())).is_local());
    }

    #[test]
    fn test_display_names_offending_input() {
        let err = InsertError::InvalidIdentifier("dbo.My Table".to_string());
        assert!(err.to_string().contains("dbo.My Table"));

        let err = InsertError::Execution {
            row: 3,
            source: BackendError::Query("constraint violation".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("row 3"));
        assert!(msg.contains("constraint violation"));
    }
}
