//! # insertmap: configuration-driven row inserts for SQL Server
//!
//! insertmap maps each input item onto the columns of one SQL Server table and
//! inserts it with a static, fully parameterized statement. Table and column
//! names are validated and bracketed; values are always bound as typed
//! parameters and never spliced into SQL text.
//!
//! ## Features
//!
//! - **Identifier sanitizing**: `dbo.People` becomes `[dbo].[People]`, anything
//!   outside `[A-Za-z0-9_]` is rejected before a connection is opened
//! - **Typed parameters**: a closed set of logical types (`varchar`, `int`,
//!   `decimal`, `uniqueidentifier`, ...) mapped to explicit SQL Server types
//! - **Value expressions**: `{{ $json.path }}` templates evaluated per item
//! - **Transactions**: all-or-nothing runs, or per-row commits
//!
//! ## Example step
//!
//! ```yaml
//! table: dbo.People
//! columns:
//!   - column_name: FirstName
//!     data_type: nvarchar
//!     length: 100
//!     value: "={{ $json.first_name }}"
//!   - column_name: Age
//!     data_type: int
//!     value: "{{ $json.age }}"
//! advanced:
//!   use_transaction: true
//! ```
//!
//! This builds
//! `INSERT INTO [dbo].[People] ([FirstName], [Age]) VALUES (@p0, @p1);`
//! and runs it once per item.

// Statement construction
pub mod identifier;
pub mod types;
pub mod statement;

// Per-row values
pub mod expression;
pub mod value;
pub mod items;

// Execution
pub mod backend;
pub mod executor;
pub mod run;

pub mod config;
pub mod error;

// Re-export key types
pub use error::InsertError;
pub use identifier::{sanitize, TableReference};
pub use types::{resolve, LogicalType, TypeDescriptor};
pub use statement::{build, ColumnMapping, PreparedStatement};
pub use expression::{ItemResolver, ValueExpression, ValueResolver};
pub use value::BindValue;
pub use items::{InputItem, RowResult, SerializationError};
pub use backend::{BackendError, BoundParam, Connector, Session};
pub use backend::{ConnectionOptions, Database, DatabaseConfig};
pub use run::{InsertPlan, InsertRun, RunOptions, RunState};
pub use config::{ConfigError, StepConfig};
