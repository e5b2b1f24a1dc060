//! Column mappings and the static INSERT statement built from them.

use crate::error::InsertError;
use crate::expression::ValueExpression;
use crate::identifier::{self, TableReference};
use crate::types::{LogicalType, TypeDescriptor};

/// One configured target column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub column_name: String,
    pub data_type: LogicalType,
    pub length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub value: ValueExpression,
}

impl ColumnMapping {
    /// Create a mapping from a type name, failing on unknown types
    pub fn new(
        column_name: impl Into<String>,
        type_name: &str,
        value: ValueExpression,
    ) -> Result<Self, InsertError> {
        Ok(Self {
            column_name: column_name.into(),
            data_type: type_name.parse()?,
            length: None,
            precision: None,
            scale: None,
            value,
        })
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn descriptor(&self) -> TypeDescriptor {
        self.data_type
            .descriptor(self.length, self.precision, self.scale)
    }
}

/// A positional parameter of the prepared statement
#[derive(Debug, Clone, PartialEq)]
pub struct StatementParam {
    /// Parameter name without the `@` prefix, e.g. `p0`
    pub name: String,
    pub column: ColumnMapping,
    pub descriptor: TypeDescriptor,
}

/// The static INSERT text plus the parameters it expects, in order
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    sql: String,
    table: TableReference,
    params: Vec<StatementParam>,
}

impl PreparedStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn params(&self) -> &[StatementParam] {
        &self.params
    }

    /// Parameter declaration list, e.g. `@p0 NVARCHAR(MAX), @p1 INT`
    pub fn parameter_declarations(&self) -> String {
        self.params
            .iter()
            .map(|p| format!("@{} {}", p.name, p.descriptor.declaration()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Build the INSERT statement for a table and its column mappings.
///
/// Only identifiers and placeholders end up in the SQL text; row values are
/// always bound as parameters.
pub fn build(
    table: &TableReference,
    columns: &[ColumnMapping],
) -> Result<PreparedStatement, InsertError> {
    if columns.is_empty() {
        return Err(InsertError::NoColumnsConfigured);
    }

    let quoted_columns = columns
        .iter()
        .map(|c| identifier::sanitize(&c.column_name))
        .collect::<Result<Vec<_>, _>>()?;

    let params: Vec<StatementParam> = columns
        .iter()
        .enumerate()
        .map(|(idx, c)| StatementParam {
            name: format!("p{}", idx),
            column: c.clone(),
            descriptor: c.descriptor(),
        })
        .collect();

    let placeholders = params
        .iter()
        .map(|p| format!("@{}", p.name))
        .collect::<Vec<_>>();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({});",
        table.quoted(),
        quoted_columns.join(", "),
        placeholders.join(", ")
    );

    Ok(PreparedStatement {
        sql,
        table: table.clone(),
        params,
    })
}
