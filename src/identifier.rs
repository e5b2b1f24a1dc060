//! Identifier validation and bracket quoting.
//!
//! Table and column names cannot be sent as parameters, so they are embedded
//! in the statement text. Every name passes through [`sanitize`] first.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::InsertError;

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
    })
}

/// Check a single dot-free identifier segment
pub fn is_valid_segment(segment: &str) -> bool {
    segment_pattern().is_match(segment)
}

/// Validate a possibly dotted identifier and bracket each segment.
///
/// # Example
/// ```
/// use insertmap::identifier::sanitize;
///
/// assert_eq!(sanitize("dbo.MyTable").unwrap(), "[dbo].[MyTable]");
/// assert!(sanitize("dbo.My-Table").is_err());
/// ```
pub fn sanitize(identifier: &str) -> Result<String, InsertError> {
    let parts = split_segments(identifier)?;
    Ok(bracket(&parts))
}

fn split_segments(identifier: &str) -> Result<Vec<String>, InsertError> {
    let parts: Vec<&str> = identifier.split('.').collect();
    if !parts.iter().all(|p| is_valid_segment(p)) {
        return Err(InsertError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(parts.into_iter().map(str::to_string).collect())
}

fn bracket(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| format!("[{}]", p))
        .collect::<Vec<_>>()
        .join(".")
}

/// A validated, optionally schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReference {
    parts: Vec<String>,
}

impl TableReference {
    /// Parse free text such as `dbo.People`
    pub fn parse(text: &str) -> Result<Self, InsertError> {
        Ok(Self {
            parts: split_segments(text)?,
        })
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Bracketed form, e.g. `[dbo].[People]`
    pub fn quoted(&self) -> String {
        bracket(&self.parts)
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}
