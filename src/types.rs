//! Logical column types and their parameter descriptors.

use std::fmt;
use std::str::FromStr;

use crate::error::InsertError;

/// Precision and scale used when a decimal column does not supply both
pub const DEFAULT_DECIMAL_PRECISION: u8 = 18;
pub const DEFAULT_DECIMAL_SCALE: u8 = 2;

/// User-facing column type names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    VarChar,
    NVarChar,
    Int,
    BigInt,
    Float,
    Decimal,
    Bit,
    Date,
    DateTime2,
    UniqueIdentifier,
}

impl LogicalType {
    pub const ALL: [LogicalType; 10] = [
        LogicalType::VarChar,
        LogicalType::NVarChar,
        LogicalType::Int,
        LogicalType::BigInt,
        LogicalType::Float,
        LogicalType::Decimal,
        LogicalType::Bit,
        LogicalType::Date,
        LogicalType::DateTime2,
        LogicalType::UniqueIdentifier,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LogicalType::VarChar => "varchar",
            LogicalType::NVarChar => "nvarchar",
            LogicalType::Int => "int",
            LogicalType::BigInt => "bigint",
            LogicalType::Float => "float",
            LogicalType::Decimal => "decimal",
            LogicalType::Bit => "bit",
            LogicalType::Date => "date",
            LogicalType::DateTime2 => "datetime2",
            LogicalType::UniqueIdentifier => "uniqueidentifier",
        }
    }

    /// Build the descriptor for this type.
    ///
    /// Zero counts as "not supplied" for every option: a zero length means
    /// MAX, and a decimal only keeps its precision and scale when both are
    /// non-zero.
    pub fn descriptor(
        &self,
        length: Option<u32>,
        precision: Option<u8>,
        scale: Option<u8>,
    ) -> TypeDescriptor {
        let length = length.filter(|&n| n != 0);
        match self {
            LogicalType::VarChar => TypeDescriptor::VarChar(length),
            LogicalType::NVarChar => TypeDescriptor::NVarChar(length),
            LogicalType::Int => TypeDescriptor::Int,
            LogicalType::BigInt => TypeDescriptor::BigInt,
            LogicalType::Float => TypeDescriptor::Float,
            LogicalType::Decimal => match (precision, scale) {
                (Some(p), Some(s)) if p != 0 && s != 0 => TypeDescriptor::Decimal {
                    precision: p,
                    scale: s,
                },
                _ => TypeDescriptor::Decimal {
                    precision: DEFAULT_DECIMAL_PRECISION,
                    scale: DEFAULT_DECIMAL_SCALE,
                },
            },
            LogicalType::Bit => TypeDescriptor::Bit,
            LogicalType::Date => TypeDescriptor::Date,
            LogicalType::DateTime2 => TypeDescriptor::DateTime2,
            LogicalType::UniqueIdentifier => TypeDescriptor::UniqueIdentifier,
        }
    }
}

impl FromStr for LogicalType {
    type Err = InsertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        LogicalType::ALL
            .into_iter()
            .find(|t| t.name() == lowered)
            .ok_or_else(|| InsertError::UnsupportedType(s.to_string()))
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Concrete parameter type sent to the server alongside each value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDescriptor {
    /// Bounded by the length when present, otherwise MAX
    VarChar(Option<u32>),
    NVarChar(Option<u32>),
    Int,
    BigInt,
    Float,
    Decimal { precision: u8, scale: u8 },
    Bit,
    Date,
    DateTime2,
    UniqueIdentifier,
}

impl TypeDescriptor {
    /// T-SQL type used to declare a parameter of this descriptor
    pub fn declaration(&self) -> String {
        match self {
            TypeDescriptor::VarChar(Some(n)) => format!("VARCHAR({})", n),
            TypeDescriptor::VarChar(None) => "VARCHAR(MAX)".to_string(),
            TypeDescriptor::NVarChar(Some(n)) => format!("NVARCHAR({})", n),
            TypeDescriptor::NVarChar(None) => "NVARCHAR(MAX)".to_string(),
            TypeDescriptor::Int => "INT".to_string(),
            TypeDescriptor::BigInt => "BIGINT".to_string(),
            TypeDescriptor::Float => "FLOAT".to_string(),
            TypeDescriptor::Decimal { precision, scale } => {
                format!("DECIMAL({},{})", precision, scale)
            }
            TypeDescriptor::Bit => "BIT".to_string(),
            TypeDescriptor::Date => "DATE".to_string(),
            TypeDescriptor::DateTime2 => "DATETIME2".to_string(),
            TypeDescriptor::UniqueIdentifier => "UNIQUEIDENTIFIER".to_string(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.declaration())
    }
}

/// Resolve a type name and its options into a descriptor
///
/// # Example
/// ```
/// use insertmap::types::{resolve, TypeDescriptor};
///
/// let d = resolve("decimal", None, Some(10), Some(4)).unwrap();
/// assert_eq!(d, TypeDescriptor::Decimal { precision: 10, scale: 4 });
/// ```
pub fn resolve(
    type_name: &str,
    length: Option<u32>,
    precision: Option<u8>,
    scale: Option<u8>,
) -> Result<TypeDescriptor, InsertError> {
    let logical: LogicalType = type_name.parse()?;
    Ok(logical.descriptor(length, precision, scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_defaults() {
        let default = TypeDescriptor::Decimal {
            precision: 18,
            scale: 2,
        };
        assert_eq!(resolve("decimal", None, None, None).unwrap(), default);
        assert_eq!(resolve("decimal", None, Some(0), Some(4)).unwrap(), default);
        assert_eq!(resolve("decimal", None, Some(10), None).unwrap(), default);
        // a zero scale also falls back to the default pair
        assert_eq!(resolve("decimal", None, Some(10), Some(0)).unwrap(), default);
    }

    #[test]
    fn test_decimal_explicit() {
        assert_eq!(
            resolve("decimal", None, Some(10), Some(4)).unwrap(),
            TypeDescriptor::Decimal {
                precision: 10,
                scale: 4
            }
        );
    }

    #[test]
    fn test_string_lengths() {
        assert_eq!(
            resolve("nvarchar", Some(255), None, None).unwrap(),
            TypeDescriptor::NVarChar(Some(255))
        );
        assert_eq!(
            resolve("varchar", None, None, None).unwrap(),
            TypeDescriptor::VarChar(None)
        );
        assert_eq!(
            resolve("varchar", Some(0), None, None).unwrap(),
            TypeDescriptor::VarChar(None)
        );
    }

    #[test]
    fn test_fixed_types() {
        assert_eq!(resolve("int", None, None, None).unwrap(), TypeDescriptor::Int);
        assert_eq!(resolve("bigint", None, None, None).unwrap(), TypeDescriptor::BigInt);
        assert_eq!(resolve("float", None, None, None).unwrap(), TypeDescriptor::Float);
        assert_eq!(resolve("bit", None, None, None).unwrap(), TypeDescriptor::Bit);
        assert_eq!(resolve("date", None, None, None).unwrap(), TypeDescriptor::Date);
        assert_eq!(
            resolve("datetime2", None, None, None).unwrap(),
            TypeDescriptor::DateTime2
        );
        assert_eq!(
            resolve("uniqueidentifier", None, None, None).unwrap(),
            TypeDescriptor::UniqueIdentifier
        );
    }

    #[test]
    fn test_type_names_are_case_insensitive() {
        assert_eq!("NVARCHAR".parse::<LogicalType>().unwrap(), LogicalType::NVarChar);
        assert_eq!("DateTime2".parse::<LogicalType>().unwrap(), LogicalType::DateTime2);
    }

    #[test]
    fn test_unsupported_type() {
        match resolve("bogus", None, None, None) {
            Err(InsertError::UnsupportedType(name)) => assert_eq!(name, "bogus"),
            other => panic!("expected UnsupportedType, got {:?}", other),
        }
        assert!(resolve("text", None, None, None).is_err());
    }

    #[test]
    fn test_declarations() {
        assert_eq!(TypeDescriptor::NVarChar(None).declaration(), "NVARCHAR(MAX)");
        assert_eq!(TypeDescriptor::VarChar(Some(50)).declaration(), "VARCHAR(50)");
        assert_eq!(
            TypeDescriptor::Decimal {
                precision: 18,
                scale: 2
            }
            .declaration(),
            "DECIMAL(18,2)"
        );
        assert_eq!(TypeDescriptor::UniqueIdentifier.to_string(), "UNIQUEIDENTIFIER");
    }

    #[test]
    fn test_every_logical_type_round_trips_its_name() {
        for t in LogicalType::ALL {
            assert_eq!(t.name().parse::<LogicalType>().unwrap(), t);
        }
    }
}
