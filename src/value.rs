//! Coercion of resolved JSON values into typed parameter values.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use uuid::Uuid;

use crate::types::TypeDescriptor;

/// A value ready to be bound to a parameter of a given descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// SQL NULL, typed by the descriptor it was coerced for
    Null(TypeDescriptor),
    String(String),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Decimal(Decimal),
    Bit(bool),
    Date(NaiveDate),
    DateTime2(NaiveDateTime),
    Guid(Uuid),
}

impl BindValue {
    pub fn is_null(&self) -> bool {
        matches!(self, BindValue::Null(_))
    }
}

impl fmt::Display for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Null(_) => write!(f, "NULL"),
            BindValue::String(s) => write!(f, "{}", s),
            BindValue::Int(i) => write!(f, "{}", i),
            BindValue::BigInt(i) => write!(f, "{}", i),
            BindValue::Float(x) => write!(f, "{}", x),
            BindValue::Decimal(d) => write!(f, "{}", d),
            BindValue::Bit(b) => write!(f, "{}", b),
            BindValue::Date(d) => write!(f, "{}", d),
            BindValue::DateTime2(dt) => write!(f, "{}", dt),
            BindValue::Guid(g) => write!(f, "{}", g),
        }
    }
}

/// Convert a JSON value into a bind value for `descriptor`.
///
/// JSON null and a missing value both become a typed NULL. The error string
/// describes why the value does not fit.
pub fn coerce(value: &Value, descriptor: &TypeDescriptor) -> Result<BindValue, String> {
    if value.is_null() {
        return Ok(BindValue::Null(*descriptor));
    }

    match descriptor {
        TypeDescriptor::VarChar(_) | TypeDescriptor::NVarChar(_) => {
            Ok(BindValue::String(to_text(value)))
        }
        TypeDescriptor::Int => {
            let n = to_i64(value)?;
            i32::try_from(n)
                .map(BindValue::Int)
                .map_err(|_| format!("{} is out of range for INT", n))
        }
        TypeDescriptor::BigInt => to_i64(value).map(BindValue::BigInt),
        TypeDescriptor::Float => to_f64(value).map(BindValue::Float),
        TypeDescriptor::Decimal { precision, scale } => {
            to_decimal(value, *precision, *scale).map(BindValue::Decimal)
        }
        TypeDescriptor::Bit => to_bool(value).map(BindValue::Bit),
        TypeDescriptor::Date => to_date(value).map(BindValue::Date),
        TypeDescriptor::DateTime2 => to_datetime(value).map(BindValue::DateTime2),
        TypeDescriptor::UniqueIdentifier => {
            let text = expect_str(value, "a GUID string")?;
            Uuid::parse_str(text.trim())
                .map(BindValue::Guid)
                .map_err(|e| format!("'{}' is not a valid GUID: {}", text, e))
        }
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn expect_str<'v>(value: &'v Value, what: &str) -> Result<&'v str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected {}, got {}", what, value))
}

fn to_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                    _ => Err(format!("{} is not an integer", n)),
                }
            }
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' is not an integer", s)),
        other => Err(format!("expected an integer, got {}", other)),
    }
}

fn to_f64(value: &Value) -> Result<f64, String> {
    let f = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{} is not a number", n))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", s))?,
        other => return Err(format!("expected a number, got {}", other)),
    };
    if f.is_finite() {
        Ok(f)
    } else {
        Err(format!("{} is not a finite number", f))
    }
}

fn to_decimal(value: &Value, precision: u8, scale: u8) -> Result<Decimal, String> {
    let parsed = match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|e| format!("{} is not a valid decimal: {}", n, e))?
        }
        Value::String(s) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map_err(|e| format!("'{}' is not a valid decimal: {}", s, e))?,
        other => return Err(format!("expected a decimal, got {}", other)),
    };

    let rounded =
        parsed.round_dp_with_strategy(u32::from(scale), RoundingStrategy::MidpointAwayFromZero);
    let integer_digits = rounded.trunc().abs().to_string().trim_start_matches('0').len();
    let allowed = usize::from(precision.saturating_sub(scale));
    if integer_digits > allowed {
        return Err(format!(
            "{} does not fit DECIMAL({},{})",
            parsed, precision, scale
        ));
    }
    Ok(rounded)
}

fn to_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => n
            .as_f64()
            .map(|f| f != 0.0)
            .ok_or_else(|| format!("{} is not a valid bit", n)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(format!("'{}' is not a valid bit", s)),
        },
        other => Err(format!("expected a boolean, got {}", other)),
    }
}

fn to_date(value: &Value) -> Result<NaiveDate, String> {
    let text = expect_str(value, "a date string")?.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }
    to_datetime(value)
        .map(|dt| dt.date())
        .map_err(|_| format!("'{}' is not a valid date", text))
}

fn to_datetime(value: &Value) -> Result<NaiveDateTime, String> {
    let text = expect_str(value, "a date/time string")?.trim();

    // offsets are normalised to UTC
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| format!("'{}' is not a valid date/time", text));
    }
    Err(format!("'{}' is not a valid date/time", text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_is_typed() {
        assert_eq!(
            coerce(&Value::Null, &TypeDescriptor::Int).unwrap(),
            BindValue::Null(TypeDescriptor::Int)
        );
    }

    #[test]
    fn test_strings() {
        let d = TypeDescriptor::NVarChar(None);
        assert_eq!(coerce(&json!("Ada"), &d).unwrap(), BindValue::String("Ada".to_string()));
        assert_eq!(coerce(&json!(42), &d).unwrap(), BindValue::String("42".to_string()));
        assert_eq!(
            coerce(&json!({"a": 1}), &d).unwrap(),
            BindValue::String("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_integers() {
        assert_eq!(coerce(&json!(7), &TypeDescriptor::Int).unwrap(), BindValue::Int(7));
        assert_eq!(coerce(&json!("  12 "), &TypeDescriptor::Int).unwrap(), BindValue::Int(12));
        assert_eq!(coerce(&json!(3.0), &TypeDescriptor::Int).unwrap(), BindValue::Int(3));
        assert_eq!(coerce(&json!(true), &TypeDescriptor::Int).unwrap(), BindValue::Int(1));
        assert!(coerce(&json!(3_000_000_000i64), &TypeDescriptor::Int).is_err());
        assert_eq!(
            coerce(&json!(3_000_000_000i64), &TypeDescriptor::BigInt).unwrap(),
            BindValue::BigInt(3_000_000_000)
        );
        assert!(coerce(&json!(1.5), &TypeDescriptor::BigInt).is_err());
        assert!(coerce(&json!("abc"), &TypeDescriptor::Int).is_err());
    }

    #[test]
    fn test_float() {
        assert_eq!(coerce(&json!(1.25), &TypeDescriptor::Float).unwrap(), BindValue::Float(1.25));
        assert_eq!(coerce(&json!("2.5"), &TypeDescriptor::Float).unwrap(), BindValue::Float(2.5));
        assert!(coerce(&json!([1]), &TypeDescriptor::Float).is_err());
    }

    #[test]
    fn test_decimal_rounds_and_checks_precision() {
        let d = TypeDescriptor::Decimal { precision: 5, scale: 2 };
        assert_eq!(
            coerce(&json!("123.456"), &d).unwrap(),
            BindValue::Decimal(Decimal::from_str("123.46").unwrap())
        );
        assert_eq!(
            coerce(&json!(0.5), &d).unwrap(),
            BindValue::Decimal(Decimal::from_str("0.5").unwrap())
        );
        assert!(coerce(&json!(1234.5), &d).is_err());
        assert!(coerce(&json!("twelve"), &d).is_err());
    }

    #[test]
    fn test_decimal_midpoint_rounds_away_from_zero() {
        let d = TypeDescriptor::Decimal { precision: 18, scale: 2 };
        let expect = |raw: Value, text: &str| {
            assert_eq!(
                coerce(&raw, &d).unwrap(),
                BindValue::Decimal(Decimal::from_str(text).unwrap())
            );
        };
        expect(json!(0.125), "0.13");
        expect(json!(-0.125), "-0.13");
        expect(json!("2.345"), "2.35");
    }

    #[test]
    fn test_bit() {
        assert_eq!(coerce(&json!(false), &TypeDescriptor::Bit).unwrap(), BindValue::Bit(false));
        assert_eq!(coerce(&json!(1), &TypeDescriptor::Bit).unwrap(), BindValue::Bit(true));
        assert_eq!(coerce(&json!("TRUE"), &TypeDescriptor::Bit).unwrap(), BindValue::Bit(true));
        assert!(coerce(&json!("maybe"), &TypeDescriptor::Bit).is_err());
    }

    #[test]
    fn test_dates() {
        assert_eq!(
            coerce(&json!("2024-02-29"), &TypeDescriptor::Date).unwrap(),
            BindValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            coerce(&json!("2024-02-29T23:30:00Z"), &TypeDescriptor::Date).unwrap(),
            BindValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert!(coerce(&json!("2023-02-29"), &TypeDescriptor::Date).is_err());
        assert!(coerce(&json!(20240229), &TypeDescriptor::Date).is_err());
    }

    #[test]
    fn test_datetime2() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_milli_opt(10, 15, 30, 250)
            .unwrap();
        assert_eq!(
            coerce(&json!("2024-05-01T12:15:30.250+02:00"), &TypeDescriptor::DateTime2).unwrap(),
            BindValue::DateTime2(expected)
        );
        assert_eq!(
            coerce(&json!("2024-05-01 10:15:30.250"), &TypeDescriptor::DateTime2).unwrap(),
            BindValue::DateTime2(expected)
        );
        assert_eq!(
            coerce(&json!("2024-05-01"), &TypeDescriptor::DateTime2).unwrap(),
            BindValue::DateTime2(
                NaiveDate::from_ymd_opt(2024, 5, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn test_guid() {
        let id = "6f9619ff-8b86-d011-b42d-00c04fc964ff";
        assert_eq!(
            coerce(&json!(id), &TypeDescriptor::UniqueIdentifier).unwrap(),
            BindValue::Guid(Uuid::parse_str(id).unwrap())
        );
        assert!(coerce(&json!("not-a-guid"), &TypeDescriptor::UniqueIdentifier).is_err());
    }
}
