//! Database capability used by insert runs.
//!
//! A [`Connector`] hands out one [`Session`] per run. Sessions execute the
//! prepared statement with bound parameters and control the transaction.
//!
//! - `mssql`: SQL Server over tiberius with an r2d2 pool

pub mod mssql;

use std::fmt;

use crate::types::TypeDescriptor;
use crate::value::BindValue;

// Re-export key types
pub use mssql::{ConnectionOptions, Database, DatabaseConfig};

/// Error type for backend operations
#[derive(Debug, Clone)]
pub enum BackendError {
    /// Could not establish a connection
    Connect(String),
    /// The pool could not provide a connection in time
    Pool(String),
    /// The server rejected a statement
    Query(String),
    /// The async runtime driving the client failed
    Runtime(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Connect(msg) => write!(f, "Connection failed: {}", msg),
            BackendError::Pool(msg) => write!(f, "Connection pool error: {}", msg),
            BackendError::Query(msg) => write!(f, "Query failed: {}", msg),
            BackendError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// A named, typed parameter value for one execution
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    /// Name without the `@` prefix
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub value: BindValue,
}

/// One logical connection, exclusively owned by a run
pub trait Session {
    /// Execute `sql` with `params`, returning the affected-row count (0 if unreported)
    fn execute(&mut self, sql: &str, params: &[BoundParam]) -> Result<u64, BackendError>;

    fn begin_transaction(&mut self) -> Result<(), BackendError>;

    fn commit(&mut self) -> Result<(), BackendError>;

    fn rollback(&mut self) -> Result<(), BackendError>;

    /// Release the session. Called exactly once at the end of every run.
    fn close(self) -> Result<(), BackendError>
    where
        Self: Sized;
}

/// Source of sessions, typically a connection pool
pub trait Connector {
    type Session: Session;

    /// Acquire a session, blocking until one is available
    fn connect(&self) -> Result<Self::Session, BackendError>;
}

impl<C: Connector> Connector for &C {
    type Session = C::Session;

    fn connect(&self) -> Result<Self::Session, BackendError> {
        (**self).connect()
    }
}
