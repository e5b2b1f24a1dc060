//! Executes the prepared statement for a single input row.

use crate::backend::{BoundParam, Session};
use crate::error::InsertError;
use crate::expression::ValueResolver;
use crate::run::RunContext;
use crate::statement::PreparedStatement;
use crate::value;

/// Resolve and coerce every parameter value for `row`
pub fn bind_row<R>(
    statement: &PreparedStatement,
    row: usize,
    resolver: &R,
) -> Result<Vec<BoundParam>, InsertError>
where
    R: ValueResolver + ?Sized,
{
    statement
        .params()
        .iter()
        .enumerate()
        .map(|(idx, param)| {
            let raw = resolver
                .resolve(idx, row)
                .map_err(|reason| InsertError::ValueResolution {
                    row,
                    column: param.column.column_name.clone(),
                    reason,
                })?;

            let bound = value::coerce(&raw, &param.descriptor).map_err(|reason| {
                InsertError::TypeMismatch {
                    row,
                    column: param.column.column_name.clone(),
                    reason,
                }
            })?;

            Ok(BoundParam {
                name: param.name.clone(),
                descriptor: param.descriptor,
                value: bound,
            })
        })
        .collect()
}

/// Insert one row and return the affected-row count reported by the server
pub fn execute_row<S, R>(
    statement: &PreparedStatement,
    row: usize,
    resolver: &R,
    context: &mut RunContext<S>,
) -> Result<u64, InsertError>
where
    S: Session,
    R: ValueResolver + ?Sized,
{
    let params = bind_row(statement, row, resolver)?;

    let affected = context
        .session_mut()
        .execute(statement.sql(), &params)
        .map_err(|source| InsertError::Execution { row, source })?;

    tracing::debug!(row, rows_affected = affected, "Inserted row");
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ValueExpression;
    use crate::identifier::TableReference;
    use crate::statement::{self, ColumnMapping};
    use crate::types::TypeDescriptor;
    use crate::value::BindValue;
    use serde_json::{json, Value};

    fn people_statement() -> PreparedStatement {
        let table = TableReference::parse("dbo.People").unwrap();
        let columns = vec![
            ColumnMapping::new("FirstName", "nvarchar", ValueExpression::new(Value::Null)).unwrap(),
            ColumnMapping::new("Age", "int", ValueExpression::new(Value::Null)).unwrap(),
        ];
        statement::build(&table, &columns).unwrap()
    }

    #[test]
    fn test_bind_row_in_column_order() {
        let statement = people_statement();
        let resolver = |column: usize, row: usize| -> Result<Value, String> {
            Ok(match column {
                0 => json!(format!("name-{}", row)),
                _ => json!(30 + row),
            })
        };

        let params = bind_row(&statement, 2, &resolver).unwrap();

        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "p0");
        assert_eq!(params[0].descriptor, TypeDescriptor::NVarChar(None));
        assert_eq!(params[0].value, BindValue::String("name-2".to_string()));
        assert_eq!(params[1].name, "p1");
        assert_eq!(params[1].value, BindValue::Int(32));
    }

    #[test]
    fn test_bind_row_resolution_failure() {
        let statement = people_statement();
        let resolver = |column: usize, _row: usize| -> Result<Value, String> {
            if column == 1 {
                Err("expression failed".to_string())
            } else {
                Ok(json!("x"))
            }
        };

        match bind_row(&statement, 4, &resolver) {
            Err(InsertError::ValueResolution { row, column, reason }) => {
                assert_eq!(row, 4);
                assert_eq!(column, "Age");
                assert_eq!(reason, "expression failed");
            }
            other => panic!("expected ValueResolution, got {:?}", other),
        }
    }

    #[test]
    fn test_bind_row_type_mismatch() {
        let statement = people_statement();
        let resolver = |_column: usize, _row: usize| -> Result<Value, String> { Ok(json!("old")) };

        match bind_row(&statement, 0, &resolver) {
            Err(InsertError::TypeMismatch { column, .. }) => assert_eq!(column, "Age"),
            other => panic!("expected TypeMismatch, got {:?}", other),
        }
    }
}
